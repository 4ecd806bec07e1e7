// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed order store.

use std::path::Path;

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::Result;

use super::{OrderData, OrderStore};

/// SQLite-backed order store.
#[derive(Clone)]
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
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
impl OrderStore for SqliteOrderStore {
    async fn save_order(&self, order: &OrderData) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("INSERT INTO orders (order_number, created_at) VALUES (?, ?)")
            .bind(&order.order_number)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let id = result.last_insert_rowid();
        tx.commit().await?;

        Ok(id)
    }

    async fn health_check(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
