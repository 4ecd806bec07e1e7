// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed outbox store.

use std::path::Path;

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::warn;

use crate::backoff::MAX_RETRY_COUNT;
use crate::error::Result;

use super::{
    DispatchRecord, NewRequest, OutboxStatus, OutboxStore, RequestRecord, dispatch_status,
    retry_schedule,
};

/// SQLite-backed outbox store.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    pool: SqlitePool,
}

impl SqliteOutboxStore {
    /// Create a store from an existing pool. Migrations are the caller's
    /// responsibility.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file as needed,
    /// connects with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn save_request(&self, request: &NewRequest) -> Result<i64> {
        let headers = serde_json::to_string(&request.headers)?;

        let result = sqlx::query(
            r#"
            INSERT INTO requests (
                request_id, content, content_type, content_length, headers,
                request_date, source, status, retry_count, next_retry_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&request.request_id)
        .bind(&request.content)
        .bind(request.content_type.as_deref())
        .bind(request.content_length)
        .bind(&headers)
        .bind(request.request_date)
        .bind(&request.source)
        .bind(OutboxStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_request(&self, id: i64) -> Result<Option<RequestRecord>> {
        let record = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, request_id, content, content_type, content_length, headers,
                   request_date, source, status, retry_count, last_retry_at,
                   processed_at, next_retry_at, error_details
            FROM requests
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<RequestRecord>> {
        let record = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, request_id, content, content_type, content_length, headers,
                   request_date, source, status, retry_count, last_retry_at,
                   processed_at, next_retry_at, error_details
            FROM requests
            WHERE request_id = ?
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_due_retries(&self, limit: i64) -> Result<Vec<RequestRecord>> {
        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, request_id, content, content_type, content_length, headers,
                   request_date, source, status, retry_count, last_retry_at,
                   processed_at, next_retry_at, error_details
            FROM requests
            WHERE status = ? AND next_retry_at <= ? AND retry_count < ?
            ORDER BY next_retry_at ASC
            LIMIT ?
            "#,
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(Utc::now())
        .bind(MAX_RETRY_COUNT)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn set_processed(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE requests SET status = ?, processed_at = ? WHERE id = ?")
            .bind(OutboxStatus::Processed.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_failed(&self, id: i64, detail: &str) -> Result<()> {
        sqlx::query(
            "UPDATE requests SET status = ?, error_details = ?, last_retry_at = ? WHERE id = ?",
        )
        .bind(OutboxStatus::Failed.as_str())
        .bind(detail)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_retry(&self, id: i64) -> Result<()> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT retry_count FROM requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some((current,)) = row else {
            warn!(id, "increment_retry on unknown request");
            return Ok(());
        };

        let now = Utc::now();
        let (new_count, next_retry_at) = retry_schedule(current, now);

        sqlx::query(
            r#"
            UPDATE requests
            SET retry_count = ?, last_retry_at = ?, next_retry_at = ?
            WHERE id = ?
            "#,
        )
        .bind(new_count)
        .bind(now)
        .bind(next_retry_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_dispatch(&self, request_id: &str, message_content: &str) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO dispatch_log (request_id, message_content, dispatched, dispatched_at, status)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(request_id)
        .bind(message_content)
        .bind(true)
        .bind(Utc::now())
        .bind(dispatch_status::PENDING)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn mark_dispatched(
        &self,
        dispatch_id: i64,
        sent: bool,
        status: &str,
        error_details: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dispatch_log SET dispatched = ?, status = ?, error_details = ? WHERE id = ?",
        )
        .bind(sent)
        .bind(status)
        .bind(error_details)
        .bind(dispatch_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_dispatches(&self, request_id: &str) -> Result<Vec<DispatchRecord>> {
        let records = sqlx::query_as::<_, DispatchRecord>(
            r#"
            SELECT id, request_id, message_content, dispatched, dispatched_at,
                   status, error_details
            FROM dispatch_log
            WHERE request_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn health_check(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
