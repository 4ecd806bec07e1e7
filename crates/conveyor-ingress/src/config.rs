// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Conveyor Ingress configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Broker URL
    pub broker_url: String,
    /// Durable processing queue the worker consumes
    pub queue: String,
    /// Optional durable response queue, declared at startup when set
    pub response_queue: Option<String>,
    /// HTTP listener address
    pub http_addr: SocketAddr,
    /// How long one dispatch waits for the worker's reply
    pub reply_timeout: Duration,
    /// How often the reconciler polls for due retries
    pub retry_poll_interval: Duration,
    /// Maximum due records fetched per reconciler poll
    pub retry_batch_size: i64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `INGRESS_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `INGRESS_BROKER_URL`: broker URL (default: nats://localhost:4222)
    /// - `INGRESS_QUEUE`: processing queue name (default: orders-processing)
    /// - `INGRESS_RESPONSE_QUEUE`: durable response queue to declare (default: unset)
    /// - `INGRESS_HTTP_PORT`: HTTP listener port (default: 8080)
    /// - `INGRESS_REPLY_TIMEOUT_SECS`: reply wait per dispatch (default: 15)
    /// - `INGRESS_RETRY_POLL_INTERVAL_SECS`: reconciler interval (default: 30)
    /// - `INGRESS_RETRY_BATCH_SIZE`: due records per poll (default: 50)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("INGRESS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("INGRESS_DATABASE_URL"))?;

        let broker_url = std::env::var("INGRESS_BROKER_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let queue =
            std::env::var("INGRESS_QUEUE").unwrap_or_else(|_| "orders-processing".to_string());

        let response_queue = std::env::var("INGRESS_RESPONSE_QUEUE").ok();

        let http_port: u16 = std::env::var("INGRESS_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("INGRESS_HTTP_PORT", "must be a valid port number")
            })?;

        let reply_timeout_secs: u64 = std::env::var("INGRESS_REPLY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("INGRESS_REPLY_TIMEOUT_SECS", "must be a positive integer")
            })?;

        let retry_poll_interval_secs: u64 = std::env::var("INGRESS_RETRY_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "INGRESS_RETRY_POLL_INTERVAL_SECS",
                    "must be a positive integer",
                )
            })?;

        let retry_batch_size: i64 = std::env::var("INGRESS_RETRY_BATCH_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("INGRESS_RETRY_BATCH_SIZE", "must be a positive integer")
            })?;

        Ok(Self {
            database_url,
            broker_url,
            queue,
            response_queue,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            reply_timeout: Duration::from_secs(reply_timeout_secs),
            retry_poll_interval: Duration::from_secs(retry_poll_interval_secs),
            retry_batch_size,
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
