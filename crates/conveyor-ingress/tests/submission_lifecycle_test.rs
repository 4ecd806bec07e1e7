// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end submission lifecycle tests.
//!
//! Drive the orchestrator and the retry reconciler together against a SQLite
//! outbox with a mocked dispatch channel: a submission whose confirmation is
//! lost stays PENDING, is picked up once due, and settles PROCESSED on the
//! redispatch, with the dispatch audit trail recording both attempts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use conveyor_ingress::migrations;
use conveyor_ingress::orchestrator::RequestOrchestrator;
use conveyor_ingress::reconciler::{RetryReconciler, RetryReconcilerConfig};
use conveyor_ingress::store::{
    NewRequest, OutboxStatus, OutboxStore, SqliteOutboxStore, dispatch_status,
};
use conveyor_transport::{BrokerError, MockDispatchChannel, ProcessingOutcome};

async fn test_store() -> (SqlitePool, SqliteOutboxStore) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");
    (pool.clone(), SqliteOutboxStore::new(pool))
}

/// Make a request's retry due now instead of waiting out the backoff.
async fn backdate_retry(pool: &SqlitePool, request_id: &str) {
    sqlx::query("UPDATE requests SET next_retry_at = ? WHERE request_id = ?")
        .bind(Utc::now() - chrono::Duration::seconds(1))
        .bind(request_id)
        .execute(pool)
        .await
        .expect("Failed to backdate retry");
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_submission_is_recovered_by_the_reconciler() {
    let (pool, store) = test_store().await;

    // First dispatch times out; the redispatch succeeds.
    let mut channel = MockDispatchChannel::new();
    channel
        .expect_publish_and_await_reply()
        .times(1)
        .returning(|_, timeout| Err(BrokerError::ReplyTimeout(timeout.as_millis() as u64)));
    channel
        .expect_publish_and_await_reply()
        .times(1)
        .returning(|envelope, _| {
            Ok(ProcessingOutcome::success(
                envelope.request_id.clone(),
                11,
                "Order ORD-500 successfully processed",
            ))
        });

    let orchestrator = Arc::new(RequestOrchestrator::new(
        Arc::new(store.clone()),
        Arc::new(channel),
        Duration::from_secs(15),
    ));

    let request = NewRequest::new(r#"{"OrderNumber":"ORD-500"}"#);
    let request_id = request.request_id.clone();

    let outcome = orchestrator.submit(&request).await.expect("submit failed");
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Timeout waiting for processing confirmation");

    let record = store
        .find_by_request_id(&request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, OutboxStatus::Pending.as_str());
    assert_eq!(record.retry_count, 1);

    backdate_retry(&pool, &request_id).await;

    let reconciler = RetryReconciler::new(
        Arc::new(store.clone()),
        orchestrator.clone(),
        RetryReconcilerConfig {
            poll_interval: Duration::from_millis(50),
            batch_size: 50,
        },
    );
    let shutdown = reconciler.shutdown_handle();
    let handle = tokio::spawn(reconciler.run());

    let mut processed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let record = store
            .find_by_request_id(&request_id)
            .await
            .unwrap()
            .unwrap();
        if record.status == OutboxStatus::Processed.as_str() {
            processed = true;
            break;
        }
    }
    assert!(processed, "the due retry should settle PROCESSED");

    // The audit trail shows both attempts.
    let trail = store.find_dispatches(&request_id).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].status, dispatch_status::TIMEOUT);
    assert_eq!(trail[1].status, dispatch_status::SENT);

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reconciler should stop after shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_rejected_submission_settles_failed_and_stays_settled() {
    let (_pool, store) = test_store().await;

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

    let orchestrator = RequestOrchestrator::new(
        Arc::new(store.clone()),
        Arc::new(channel),
        Duration::from_secs(15),
    );

    let request = NewRequest::new("{}");
    let outcome = orchestrator.submit(&request).await.expect("submit failed");
    assert!(!outcome.success);

    let record = store
        .find_by_request_id(&request.request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, OutboxStatus::Failed.as_str());
    assert_eq!(
        record.error_details.as_deref(),
        Some("Missing required field: order number")
    );
    assert_eq!(record.retry_count, 0);

    // A business rejection is settled work, not retry work.
    let due = store.find_due_retries(50).await.unwrap();
    assert!(due.is_empty());
}
