// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbox store.
//!
//! Every submission is recorded here before anything crosses the broker,
//! so a crash between "received" and "delivered" leaves a PENDING row the
//! reconciler can pick up. Records are never deleted by the service;
//! envelope-status transitions are the only mutations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backoff;
use crate::error::Result;

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresOutboxStore;
pub use sqlite::SqliteOutboxStore;

/// Default source tag for submissions arriving through the HTTP front door.
pub const DEFAULT_SOURCE: &str = "external-api";

/// Outbox envelope status.
///
/// `Processed` is terminal. `Failed` keeps its retry schedule and error
/// detail; only `Pending` rows are redispatched by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Recorded, not yet confirmed by the worker.
    Pending,
    /// Worker confirmed success.
    Processed,
    /// Worker reported a failure, or publishing faulted.
    Failed,
}

impl OutboxStatus {
    /// Stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch audit statuses.
pub mod dispatch_status {
    /// Handed to the broker, outcome not yet known.
    pub const PENDING: &str = "Pending";
    /// Worker replied within the timeout.
    pub const SENT: &str = "Sent";
    /// Published, but no reply arrived within the timeout.
    pub const TIMEOUT: &str = "Timeout";
    /// Publishing faulted before a reply could be awaited.
    pub const FAILED: &str = "Failed";
}

/// A submission as it arrives, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Caller-visible request id, unique per submission.
    pub request_id: String,
    /// Raw payload as received.
    pub content: String,
    /// Declared content type, when the client sent one.
    pub content_type: Option<String>,
    /// Declared content length, when the client sent one.
    pub content_length: Option<i64>,
    /// Received headers.
    pub headers: HashMap<String, String>,
    /// Receipt timestamp.
    pub request_date: DateTime<Utc>,
    /// Origin tag.
    pub source: String,
}

impl NewRequest {
    /// Wrap a raw payload with a fresh request id, received now, from the
    /// default external source.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            content: content.into(),
            content_type: None,
            content_length: None,
            headers: HashMap::new(),
            request_date: Utc::now(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

/// Stored inbound request with its outbox envelope.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RequestRecord {
    /// Store-assigned id.
    pub id: i64,
    /// Caller-visible request id.
    pub request_id: String,
    /// Raw payload as received.
    pub content: String,
    /// Declared content type.
    pub content_type: Option<String>,
    /// Declared content length.
    pub content_length: Option<i64>,
    /// Received headers, JSON-encoded.
    pub headers: String,
    /// Receipt timestamp.
    pub request_date: DateTime<Utc>,
    /// Origin tag.
    pub source: String,
    /// Envelope status: PENDING, PROCESSED or FAILED.
    pub status: String,
    /// Completed retry attempts.
    pub retry_count: i32,
    /// When the last retry was attempted.
    pub last_retry_at: Option<DateTime<Utc>>,
    /// When the record reached PROCESSED.
    pub processed_at: Option<DateTime<Utc>>,
    /// Earliest instant the record is due for another attempt.
    pub next_retry_at: DateTime<Utc>,
    /// Error detail from the last failure.
    pub error_details: Option<String>,
}

/// Audit row for one envelope handed to the broker.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DispatchRecord {
    /// Store-assigned id.
    pub id: i64,
    /// Request the envelope belongs to.
    pub request_id: String,
    /// Serialized envelope as published.
    pub message_content: String,
    /// Whether the broker accepted the publish.
    pub dispatched: bool,
    /// When the envelope was handed to the broker.
    pub dispatched_at: DateTime<Utc>,
    /// Dispatch status: Pending, Sent, Timeout or Failed.
    pub status: String,
    /// Error detail when the dispatch faulted.
    pub error_details: Option<String>,
}

/// Persistence contract for the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new submission with a PENDING envelope due immediately.
    /// Returns the store-assigned id.
    async fn save_request(&self, request: &NewRequest) -> Result<i64>;

    /// Fetch one record by store-assigned id.
    async fn get_request(&self, id: i64) -> Result<Option<RequestRecord>>;

    /// Fetch one record by caller-visible request id.
    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<RequestRecord>>;

    /// Fetch up to `limit` PENDING records whose `next_retry_at` has
    /// elapsed and whose retry count is under the cap, ordered by
    /// `next_retry_at` ascending.
    async fn find_due_retries(&self, limit: i64) -> Result<Vec<RequestRecord>>;

    /// Transition a record to PROCESSED and stamp `processed_at`.
    async fn set_processed(&self, id: i64) -> Result<()>;

    /// Transition a record to FAILED with the reported detail. The record
    /// keeps its retry schedule.
    async fn set_failed(&self, id: i64, detail: &str) -> Result<()>;

    /// Count one more attempt: bump `retry_count`, stamp `last_retry_at`,
    /// and push `next_retry_at` out by the backoff delay for the new
    /// count. Leaves the status untouched.
    async fn increment_retry(&self, id: i64) -> Result<()>;

    /// Append a dispatch audit row for an envelope about to be published.
    async fn record_dispatch(&self, request_id: &str, message_content: &str) -> Result<i64>;

    /// Settle a dispatch audit row once the publish outcome is known.
    async fn mark_dispatched(
        &self,
        dispatch_id: i64,
        sent: bool,
        status: &str,
        error_details: Option<&str>,
    ) -> Result<()>;

    /// Fetch the dispatch audit trail for one request, oldest first.
    async fn find_dispatches(&self, request_id: &str) -> Result<Vec<DispatchRecord>>;

    /// Cheap connectivity probe.
    async fn health_check(&self) -> Result<bool>;
}

/// Attempt count and due time for a record that just consumed a retry.
pub(crate) fn retry_schedule(current_count: i32, now: DateTime<Utc>) -> (i32, DateTime<Utc>) {
    let new_count = current_count + 1;
    (new_count, backoff::next_retry_at(now, new_count))
}
