// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed outbox store.

use chrono::Utc;
use sqlx::PgPool;
use tracing::warn;

use crate::backoff::MAX_RETRY_COUNT;
use crate::error::Result;

use super::{
    DispatchRecord, NewRequest, OutboxStatus, OutboxStore, RequestRecord, dispatch_status,
    retry_schedule,
};

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Create a store from an existing pool. Migrations are the caller's
    /// responsibility.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn save_request(&self, request: &NewRequest) -> Result<i64> {
        let headers = serde_json::to_string(&request.headers)?;

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO requests (
                request_id, content, content_type, content_length, headers,
                request_date, source, status, retry_count, next_retry_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9)
            RETURNING id
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
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn get_request(&self, id: i64) -> Result<Option<RequestRecord>> {
        let record = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, request_id, content, content_type, content_length, headers,
                   request_date, source, status, retry_count, last_retry_at,
                   processed_at, next_retry_at, error_details
            FROM requests
            WHERE id = $1
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
            WHERE request_id = $1
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
            WHERE status = $1 AND next_retry_at <= $2 AND retry_count < $3
            ORDER BY next_retry_at ASC
            LIMIT $4
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
        sqlx::query("UPDATE requests SET status = $1, processed_at = $2 WHERE id = $3")
            .bind(OutboxStatus::Processed.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_failed(&self, id: i64, detail: &str) -> Result<()> {
        sqlx::query(
            "UPDATE requests SET status = $1, error_details = $2, last_retry_at = $3 WHERE id = $4",
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
        let row: Option<(i32,)> = sqlx::query_as("SELECT retry_count FROM requests WHERE id = $1")
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
            SET retry_count = $1, last_retry_at = $2, next_retry_at = $3
            WHERE id = $4
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
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO dispatch_log (request_id, message_content, dispatched, dispatched_at, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(request_id)
        .bind(message_content)
        .bind(true)
        .bind(Utc::now())
        .bind(dispatch_status::PENDING)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn mark_dispatched(
        &self,
        dispatch_id: i64,
        sent: bool,
        status: &str,
        error_details: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dispatch_log SET dispatched = $1, status = $2, error_details = $3 WHERE id = $4",
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
            WHERE request_id = $1
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
