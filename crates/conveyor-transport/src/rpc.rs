// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RPC over the work queue.
//!
//! Each call publishes a dispatch envelope to the durable processing
//! queue and opens a fresh, private reply inbox for this single call.
//! There is no shared reply queue and no correlation-id multiplexing:
//! concurrent calls cannot interfere with each other's replies. The
//! inbox subscription ends when the call resolves, so a reply arriving
//! after the timeout is delivered to a subject nobody subscribes to and
//! is dropped by the broker.

use std::sync::Arc;
use std::time::Duration;

use async_nats::HeaderMap;
use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::{BrokerClient, ensure_work_queue};
use crate::error::{BrokerError, Result};
use crate::message::{
    CONTENT_TYPE_JSON, DispatchEnvelope, HEADER_CONTENT_TYPE, HEADER_MSG_ID, HEADER_REPLY_TO,
    ProcessingOutcome,
};

/// Reply timeout used when a caller has no stricter requirement.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Producer-side view of the processing queue.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DispatchChannel: Send + Sync {
    /// Publish `envelope` and wait up to `timeout` for the worker's
    /// outcome. Timing out does not retract the published message; it may
    /// still be processed, and its late reply is discarded.
    async fn publish_and_await_reply(
        &self,
        envelope: &DispatchEnvelope,
        timeout: Duration,
    ) -> Result<ProcessingOutcome>;

    /// Publish `envelope` without asking for a reply. Returns once the
    /// broker acknowledges receipt, not processing.
    async fn publish(&self, envelope: &DispatchEnvelope) -> Result<()>;
}

/// Worker-side publisher for processing outcomes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    /// Publish an outcome payload to the reply inbox named by the producer.
    async fn publish_reply(&self, subject: &str, payload: Bytes) -> Result<()>;
}

/// Request/reply channel over one durable work queue.
pub struct RpcChannel {
    broker: Arc<BrokerClient>,
    queue: String,
}

impl RpcChannel {
    /// Channel publishing to `queue`. The queue is declared on first use.
    pub fn new(broker: Arc<BrokerClient>, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
        }
    }

    async fn publish_envelope(
        &self,
        js: &jetstream::Context,
        envelope: &DispatchEnvelope,
        reply_to: Option<&str>,
    ) -> Result<()> {
        let message_id = Uuid::new_v4().to_string();
        let payload = serde_json::to_vec(envelope)?;

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_MSG_ID, message_id.as_str());
        headers.insert(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON);
        if let Some(inbox) = reply_to {
            headers.insert(HEADER_REPLY_TO, inbox);
        }

        let ack = js
            .publish_with_headers(self.queue.clone(), headers, payload.into())
            .await?;
        ack.await.map_err(|e| BrokerError::Publish(e.to_string()))?;

        debug!(
            request_id = %envelope.request_id,
            message_id = %message_id,
            queue = %self.queue,
            "published dispatch envelope"
        );
        Ok(())
    }
}

#[async_trait]
impl DispatchChannel for RpcChannel {
    async fn publish_and_await_reply(
        &self,
        envelope: &DispatchEnvelope,
        timeout: Duration,
    ) -> Result<ProcessingOutcome> {
        let client = self.broker.client().await?;
        let js = jetstream::new(client.clone());
        ensure_work_queue(&js, &self.queue).await?;

        // Private mailbox for this call only.
        let inbox = client.new_inbox();
        let subscriber = client.subscribe(inbox.clone()).await?;

        self.publish_envelope(&js, envelope, Some(&inbox)).await?;

        debug!(
            request_id = %envelope.request_id,
            reply_inbox = %inbox,
            timeout_ms = timeout.as_millis() as u64,
            "awaiting processing outcome"
        );

        match await_first(subscriber, timeout).await {
            Some(reply) => {
                let outcome: ProcessingOutcome = serde_json::from_slice(&reply.payload)?;
                debug!(
                    request_id = %envelope.request_id,
                    success = outcome.success,
                    "received processing outcome"
                );
                Ok(outcome)
            }
            None => {
                warn!(
                    request_id = %envelope.request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out waiting for processing outcome"
                );
                Err(BrokerError::ReplyTimeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn publish(&self, envelope: &DispatchEnvelope) -> Result<()> {
        let js = self.broker.jetstream().await?;
        ensure_work_queue(&js, &self.queue).await?;
        self.publish_envelope(&js, envelope, None).await
    }
}

#[async_trait]
impl ReplyPublisher for BrokerClient {
    async fn publish_reply(&self, subject: &str, payload: Bytes) -> Result<()> {
        let client = self.client().await?;
        client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        client
            .flush()
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }
}

/// Resolve with the first item yielded by `stream`, or `None` once
/// `timeout` elapses. The stream is consumed either way, so items
/// arriving after resolution are never observable by the caller.
async fn await_first<S>(mut stream: S, timeout: Duration) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match tokio::time::timeout(timeout, stream.next()).await {
        Ok(item) => item,
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;

    #[tokio::test]
    async fn await_first_returns_the_first_item() {
        let items = stream::iter(vec![1, 2, 3]);
        assert_eq!(await_first(items, Duration::from_secs(1)).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn await_first_times_out_on_a_silent_stream() {
        let silent = stream::pending::<u32>();
        assert_eq!(await_first(silent, Duration::from_secs(30)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn late_replies_are_not_observable_after_timeout() {
        let (sender, receiver) = mpsc::unbounded::<u32>();

        assert_eq!(await_first(receiver, Duration::from_secs(15)).await, None);

        // The mailbox went away with the wait; a late reply has nowhere
        // to land.
        assert!(sender.unbounded_send(42).is_err());
    }
}
