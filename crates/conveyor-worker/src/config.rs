// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Conveyor Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Broker URL
    pub broker_url: String,
    /// Durable processing queue to consume
    pub queue: String,
    /// Durable pull consumer name on the processing queue
    pub durable_name: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WORKER_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `WORKER_BROKER_URL`: broker URL (default: nats://localhost:4222)
    /// - `WORKER_QUEUE`: processing queue name (default: orders-processing)
    /// - `WORKER_DURABLE_NAME`: pull consumer name (default: order-worker)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("WORKER_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("WORKER_DATABASE_URL"))?;

        let broker_url = std::env::var("WORKER_BROKER_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let queue =
            std::env::var("WORKER_QUEUE").unwrap_or_else(|_| "orders-processing".to_string());

        let durable_name =
            std::env::var("WORKER_DURABLE_NAME").unwrap_or_else(|_| "order-worker".to_string());

        Ok(Self {
            database_url,
            broker_url,
            queue,
            durable_name,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
