// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for worker operations.

use thiserror::Error;

/// Errors produced by the worker service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying embedded migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Broker transport operation failed.
    #[error("broker error: {0}")]
    Broker(#[from] conveyor_transport::BrokerError),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that does not fit the other variants.
    #[error("{0}")]
    Other(String),
}

/// Convenience result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;
