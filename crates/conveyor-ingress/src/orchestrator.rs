// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submission pipeline: persist, dispatch, settle.
//!
//! The orchestrator owns the outbox write path. Every submission is recorded
//! before anything touches the broker, so a crash between the two steps
//! leaves a PENDING row for the reconciler instead of a lost request. The
//! same settle logic serves fresh submissions and reconciler redispatches.

use std::sync::Arc;
use std::time::Duration;

use conveyor_transport::{BrokerError, DispatchChannel, DispatchEnvelope, ProcessingOutcome};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::store::{NewRequest, OutboxStore, RequestRecord, dispatch_status};

/// Drives a submission through the outbox: persist the row, dispatch the
/// envelope over the processing queue, settle the row from the worker's
/// reply.
pub struct RequestOrchestrator {
    store: Arc<dyn OutboxStore>,
    channel: Arc<dyn DispatchChannel>,
    reply_timeout: Duration,
}

impl RequestOrchestrator {
    /// Create an orchestrator. `reply_timeout` bounds the wait for the
    /// worker's confirmation on each dispatch.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        channel: Arc<dyn DispatchChannel>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            store,
            channel,
            reply_timeout,
        }
    }

    /// Record a new submission and dispatch it to the worker.
    ///
    /// The row is saved before any broker interaction; whatever happens on
    /// the wire afterwards, the submission itself is never lost.
    pub async fn submit(&self, request: &NewRequest) -> Result<ProcessingOutcome> {
        info!(request_id = %request.request_id, "processing new submission");
        let id = self.store.save_request(request).await?;

        let envelope = DispatchEnvelope {
            request_id: request.request_id.clone(),
            content: request.content.clone(),
            request_date: request.request_date,
            source: request.source.clone(),
        };
        self.dispatch(id, &envelope).await
    }

    /// Redispatch a stored PENDING record on behalf of the retry reconciler.
    /// The envelope is rebuilt from the row exactly as originally saved.
    pub async fn resubmit(&self, record: &RequestRecord) -> Result<ProcessingOutcome> {
        info!(
            request_id = %record.request_id,
            retry_count = record.retry_count,
            "redispatching stored submission"
        );
        let envelope = DispatchEnvelope {
            request_id: record.request_id.clone(),
            content: record.content.clone(),
            request_date: record.request_date,
            source: record.source.clone(),
        };
        self.dispatch(record.id, &envelope).await
    }

    async fn dispatch(&self, id: i64, envelope: &DispatchEnvelope) -> Result<ProcessingOutcome> {
        let message = serde_json::to_string(envelope)?;
        let dispatch_id = self
            .store
            .record_dispatch(&envelope.request_id, &message)
            .await?;

        match self
            .channel
            .publish_and_await_reply(envelope, self.reply_timeout)
            .await
        {
            Ok(outcome) => {
                self.store
                    .mark_dispatched(dispatch_id, true, dispatch_status::SENT, None)
                    .await?;
                if outcome.success {
                    self.store.set_processed(id).await?;
                    info!(request_id = %envelope.request_id, "worker confirmed processing");
                } else {
                    let detail = outcome
                        .error_details
                        .as_deref()
                        .unwrap_or("Unknown error from consumer");
                    self.store.set_failed(id, detail).await?;
                    warn!(request_id = %envelope.request_id, detail, "worker reported failure");
                }
                Ok(outcome)
            }
            Err(err @ BrokerError::ReplyTimeout(_)) => {
                // Delivered, possibly even processed; only the confirmation
                // is missing. The row stays PENDING so the reconciler picks
                // it up again once next_retry_at passes.
                warn!(request_id = %envelope.request_id, "no confirmation from worker before timeout");
                self.store.increment_retry(id).await?;
                self.store
                    .mark_dispatched(
                        dispatch_id,
                        true,
                        dispatch_status::TIMEOUT,
                        Some(&err.to_string()),
                    )
                    .await?;
                Ok(ProcessingOutcome::failure(
                    Some(envelope.request_id.clone()),
                    "Timeout waiting for processing confirmation",
                    Some("Consumer did not respond within the timeout period".to_string()),
                ))
            }
            Err(BrokerError::Serialization(err)) => {
                // The worker replied, but with a body we cannot read.
                let detail = err.to_string();
                warn!(request_id = %envelope.request_id, %err, "unreadable reply from worker");
                self.store.set_failed(id, &detail).await?;
                self.store
                    .mark_dispatched(dispatch_id, true, dispatch_status::SENT, Some(&detail))
                    .await?;
                Ok(ProcessingOutcome::failure(
                    Some(envelope.request_id.clone()),
                    "Failed to deserialize processing result",
                    Some("Invalid response from consumer".to_string()),
                ))
            }
            Err(err) => {
                let detail = err.to_string();
                error!(request_id = %envelope.request_id, %err, "failed to publish submission");
                self.store.set_failed(id, &detail).await?;
                self.store.increment_retry(id).await?;
                self.store
                    .mark_dispatched(dispatch_id, false, dispatch_status::FAILED, Some(&detail))
                    .await?;
                Ok(ProcessingOutcome::failure(
                    Some(envelope.request_id.clone()),
                    "Failed to send message for processing",
                    Some(detail),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use conveyor_transport::MockDispatchChannel;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::store::{OutboxStatus, SqliteOutboxStore};

    async fn test_store() -> SqliteOutboxStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");
        crate::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");
        SqliteOutboxStore::new(pool)
    }

    fn orchestrator(
        store: &SqliteOutboxStore,
        channel: MockDispatchChannel,
    ) -> RequestOrchestrator {
        RequestOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(channel),
            Duration::from_secs(15),
        )
    }

    #[tokio::test]
    async fn test_submit_success_marks_processed() {
        let store = test_store().await;
        let mut channel = MockDispatchChannel::new();
        channel
            .expect_publish_and_await_reply()
            .times(1)
            .returning(|envelope, _| {
                Ok(ProcessingOutcome::success(
                    envelope.request_id.clone(),
                    42,
                    "Order O-100 successfully processed",
                ))
            });

        let orchestrator = orchestrator(&store, channel);
        let request = NewRequest::new(r#"{"OrderNumber":"O-100"}"#);
        let request_id = request.request_id.clone();

        let outcome = orchestrator
            .submit(&request)
            .await
            .expect("Failed to submit");
        assert!(outcome.success);
        assert_eq!(outcome.order_id, Some(42));

        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .expect("Request should exist");
        assert_eq!(record.status, OutboxStatus::Processed.as_str());
        assert!(record.processed_at.is_some());
        assert_eq!(record.retry_count, 0);

        let dispatches = store.find_dispatches(&request_id).await.unwrap();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].status, dispatch_status::SENT);
        assert!(dispatches[0].dispatched);
    }

    #[tokio::test]
    async fn test_submit_business_failure_marks_failed_with_detail() {
        let store = test_store().await;
        let mut channel = MockDispatchChannel::new();
        channel
            .expect_publish_and_await_reply()
            .times(1)
            .returning(|envelope, _| {
                Ok(ProcessingOutcome::failure(
                    Some(envelope.request_id.clone()),
                    "Order validation failed",
                    Some("Missing required field: order number".to_string()),
                ))
            });

        let orchestrator = orchestrator(&store, channel);
        let request = NewRequest::new(r#"{"OrderNumber":""}"#);
        let request_id = request.request_id.clone();

        let outcome = orchestrator
            .submit(&request)
            .await
            .expect("Failed to submit");
        assert!(!outcome.success);

        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OutboxStatus::Failed.as_str());
        assert_eq!(
            record.error_details.as_deref(),
            Some("Missing required field: order number")
        );

        // Delivery itself succeeded, so the audit row still reads Sent.
        let dispatches = store.find_dispatches(&request_id).await.unwrap();
        assert_eq!(dispatches[0].status, dispatch_status::SENT);
    }

    #[tokio::test]
    async fn test_submit_failure_without_detail_gets_default() {
        let store = test_store().await;
        let mut channel = MockDispatchChannel::new();
        channel
            .expect_publish_and_await_reply()
            .times(1)
            .returning(|envelope, _| {
                Ok(ProcessingOutcome::failure(
                    Some(envelope.request_id.clone()),
                    "Order validation failed",
                    None,
                ))
            });

        let orchestrator = orchestrator(&store, channel);
        let request = NewRequest::new("{}");
        let request_id = request.request_id.clone();
        orchestrator
            .submit(&request)
            .await
            .expect("Failed to submit");

        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            record.error_details.as_deref(),
            Some("Unknown error from consumer")
        );
    }

    #[tokio::test]
    async fn test_submit_timeout_keeps_row_pending() {
        let store = test_store().await;
        let mut channel = MockDispatchChannel::new();
        channel
            .expect_publish_and_await_reply()
            .times(1)
            .returning(|_, _| Err(BrokerError::ReplyTimeout(15_000)));

        let orchestrator = orchestrator(&store, channel);
        let request = NewRequest::new(r#"{"OrderNumber":"O-100"}"#);
        let request_id = request.request_id.clone();

        let outcome = orchestrator
            .submit(&request)
            .await
            .expect("Failed to submit");
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Timeout waiting for processing confirmation");
        assert_eq!(
            outcome.error_details.as_deref(),
            Some("Consumer did not respond within the timeout period")
        );
        assert_eq!(outcome.request_id.as_deref(), Some(request_id.as_str()));

        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OutboxStatus::Pending.as_str());
        assert_eq!(record.retry_count, 1);
        assert!(record.next_retry_at > Utc::now());

        let dispatches = store.find_dispatches(&request_id).await.unwrap();
        assert_eq!(dispatches[0].status, dispatch_status::TIMEOUT);
        assert!(dispatches[0].dispatched);
    }

    #[tokio::test]
    async fn test_submit_publish_fault_marks_failed_and_counts_attempt() {
        let store = test_store().await;
        let mut channel = MockDispatchChannel::new();
        channel
            .expect_publish_and_await_reply()
            .times(1)
            .returning(|_, _| Err(BrokerError::Publish("connection reset".to_string())));

        let orchestrator = orchestrator(&store, channel);
        let request = NewRequest::new(r#"{"OrderNumber":"O-100"}"#);
        let request_id = request.request_id.clone();

        let outcome = orchestrator
            .submit(&request)
            .await
            .expect("Failed to submit");
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Failed to send message for processing");
        assert!(
            outcome
                .error_details
                .as_deref()
                .unwrap()
                .contains("connection reset")
        );

        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OutboxStatus::Failed.as_str());
        assert_eq!(record.retry_count, 1);
        assert!(
            record
                .error_details
                .as_deref()
                .unwrap()
                .contains("connection reset")
        );

        let dispatches = store.find_dispatches(&request_id).await.unwrap();
        assert_eq!(dispatches[0].status, dispatch_status::FAILED);
        assert!(!dispatches[0].dispatched);
    }

    #[tokio::test]
    async fn test_submit_unreadable_reply_marks_failed() {
        let store = test_store().await;
        let mut channel = MockDispatchChannel::new();
        channel
            .expect_publish_and_await_reply()
            .times(1)
            .returning(|_, _| {
                let err = serde_json::from_str::<ProcessingOutcome>("not-json").unwrap_err();
                Err(BrokerError::Serialization(err))
            });

        let orchestrator = orchestrator(&store, channel);
        let request = NewRequest::new(r#"{"OrderNumber":"O-100"}"#);
        let request_id = request.request_id.clone();

        let outcome = orchestrator
            .submit(&request)
            .await
            .expect("Failed to submit");
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Failed to deserialize processing result");
        assert_eq!(
            outcome.error_details.as_deref(),
            Some("Invalid response from consumer")
        );

        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OutboxStatus::Failed.as_str());
        // Confirmation arrived, unreadable or not.
        let dispatches = store.find_dispatches(&request_id).await.unwrap();
        assert_eq!(dispatches[0].status, dispatch_status::SENT);
    }

    #[tokio::test]
    async fn test_resubmit_uses_stored_envelope() {
        let store = test_store().await;
        let request = NewRequest::new(r#"{"OrderNumber":"O-7"}"#);
        let request_id = request.request_id.clone();
        store.save_request(&request).await.unwrap();
        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .unwrap();

        let mut channel = MockDispatchChannel::new();
        let expected_id = request_id.clone();
        channel
            .expect_publish_and_await_reply()
            .times(1)
            .withf(move |envelope, timeout| {
                envelope.request_id == expected_id
                    && envelope.content == r#"{"OrderNumber":"O-7"}"#
                    && *timeout == Duration::from_secs(15)
            })
            .returning(|envelope, _| {
                Ok(ProcessingOutcome::success(
                    envelope.request_id.clone(),
                    7,
                    "Order O-7 successfully processed",
                ))
            });

        let orchestrator = orchestrator(&store, channel);
        let outcome = orchestrator
            .resubmit(&record)
            .await
            .expect("Failed to resubmit");
        assert!(outcome.success);

        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OutboxStatus::Processed.as_str());

        // The redispatch leaves its own audit row.
        let dispatches = store.find_dispatches(&request_id).await.unwrap();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].status, dispatch_status::SENT);
    }
}
