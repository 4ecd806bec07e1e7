// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the transport layer.

use thiserror::Error;

/// Errors returned by the broker client, RPC channel, and queue consumer.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Failed to establish or reuse the broker connection.
    #[error("broker connection error: {0}")]
    Connect(String),

    /// Stream lookup or creation failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// The durable queue already exists with different attributes.
    #[error("queue '{queue}' already exists with conflicting attributes: {conflict}")]
    QueueConflict {
        /// Queue (stream) name that was being declared.
        queue: String,
        /// Human-readable description of the mismatched attributes.
        conflict: String,
    },

    /// Publishing a message or awaiting its broker acknowledgment failed.
    #[error("publish error: {0}")]
    Publish(String),

    /// Subscribing to a reply inbox failed.
    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// Creating the durable consumer or fetching deliveries failed.
    #[error("consume error: {0}")]
    Consume(String),

    /// No reply arrived within the caller's timeout.
    #[error("no reply received within {0}ms")]
    ReplyTimeout(u64),

    /// Message body could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<async_nats::ConnectError> for BrokerError {
    fn from(e: async_nats::ConnectError) -> Self {
        BrokerError::Connect(e.to_string())
    }
}

impl From<async_nats::SubscribeError> for BrokerError {
    fn from(e: async_nats::SubscribeError) -> Self {
        BrokerError::Subscribe(e.to_string())
    }
}

impl From<async_nats::jetstream::context::CreateStreamError> for BrokerError {
    fn from(e: async_nats::jetstream::context::CreateStreamError) -> Self {
        BrokerError::Stream(e.to_string())
    }
}

impl From<async_nats::jetstream::context::PublishError> for BrokerError {
    fn from(e: async_nats::jetstream::context::PublishError) -> Self {
        BrokerError::Publish(e.to_string())
    }
}

impl From<async_nats::jetstream::stream::ConsumerError> for BrokerError {
    fn from(e: async_nats::jetstream::stream::ConsumerError) -> Self {
        BrokerError::Consume(e.to_string())
    }
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
