// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable queue consumption.
//!
//! The consumer is a durable JetStream pull consumer with explicit
//! acknowledgment and at most one unacknowledged delivery in flight.
//! Holding the in-flight window at one bounds worker concurrency and
//! guarantees that delivery N+1 is never handed to the processor before
//! delivery N was acked or nacked. Throughput scales by running more
//! workers, each with its own window of one.

use std::time::Duration;

use async_nats::HeaderMap;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::broker::{BrokerClient, ensure_work_queue};
use crate::error::{BrokerError, Result};
use crate::message::HEADER_REPLY_TO;

/// How long one fetch waits for a delivery before returning empty.
const FETCH_WINDOW: Duration = Duration::from_secs(5);

/// One in-flight delivery from the processing queue.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message body.
    fn payload(&self) -> Bytes;

    /// Reply inbox named by the producer, when it expects an outcome.
    fn reply_to(&self) -> Option<String>;

    /// Acknowledge the delivery as handled.
    async fn ack(&self) -> Result<()>;

    /// Reject the delivery and ask the broker to redeliver it.
    async fn nack_requeue(&self) -> Result<()>;
}

/// [`Delivery`] backed by a JetStream message.
pub struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> Bytes {
        self.message.payload.clone()
    }

    fn reply_to(&self) -> Option<String> {
        reply_subject(self.message.headers.as_ref())
    }

    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))
    }

    async fn nack_requeue(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))
    }
}

fn reply_subject(headers: Option<&HeaderMap>) -> Option<String> {
    headers
        .and_then(|h| h.get(HEADER_REPLY_TO))
        .map(|v| v.as_str().to_string())
}

/// Durable pull consumer over one work queue.
pub struct QueueConsumer {
    consumer: PullConsumer,
}

impl QueueConsumer {
    /// Create or look up the durable consumer `durable_name` on `queue`.
    ///
    /// The queue itself is declared first, so a fresh broker can be
    /// brought up by either service in any order.
    pub async fn create(broker: &BrokerClient, queue: &str, durable_name: &str) -> Result<Self> {
        let js = broker.jetstream().await?;
        ensure_work_queue(&js, queue).await?;

        let consumer = js
            .create_consumer_on_stream(
                pull::Config {
                    durable_name: Some(durable_name.to_string()),
                    filter_subject: queue.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    // One unacknowledged delivery at a time.
                    max_ack_pending: 1,
                    ..Default::default()
                },
                queue,
            )
            .await?;

        Ok(Self { consumer })
    }

    /// Fetch the next delivery, waiting up to the fetch window. Returns
    /// `Ok(None)` when the window closes empty.
    pub async fn next_delivery(&self) -> Result<Option<JetStreamDelivery>> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(FETCH_WINDOW)
            .messages()
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        match batch.next().await {
            Some(Ok(message)) => Ok(Some(JetStreamDelivery { message })),
            Some(Err(e)) => Err(BrokerError::Consume(e.to_string())),
            None => Ok(None),
        }
    }
}
