// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker connection manager.
//!
//! Owns the process-lifetime connection to the broker and lazily
//! (re)creates it. The handle is revalidated before every reuse: a
//! connection that does not report `Connected` is treated as stale and
//! rebuilt, regardless of what the client library's own recovery
//! machinery claims.

use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream::{self, stream};
use async_nats::{Client, ConnectOptions};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{BrokerError, Result};

/// Fixed delay between the client library's automatic reconnection attempts.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker URL, e.g. `nats://localhost:4222`.
    pub url: String,
    /// How long to wait for the initial connection to come up.
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Guarded lazy broker connection shared by producers and consumers.
pub struct BrokerClient {
    config: BrokerConfig,
    connection: Mutex<Option<Client>>,
}

impl BrokerClient {
    /// Create a manager without connecting; the first acquisition connects.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Create a manager and establish the connection eagerly. Callers that
    /// must fail fast on a misconfigured broker use this; callers with
    /// their own retry loop use [`new`](Self::new).
    pub async fn connect(config: BrokerConfig) -> Result<Self> {
        let manager = Self::new(config);
        manager.client().await?;
        Ok(manager)
    }

    /// Return the live connection, establishing a new one if the current
    /// handle is absent or stale.
    pub async fn client(&self) -> Result<Client> {
        let mut guard = self.connection.lock().await;

        if let Some(client) = guard.as_ref() {
            if client.connection_state() == State::Connected {
                debug!("reusing open broker connection");
                return Ok(client.clone());
            }
            info!(state = ?client.connection_state(), "broker connection is stale; reconnecting");
        } else {
            info!(url = %self.config.url, "establishing broker connection");
        }

        let client = ConnectOptions::new()
            .connection_timeout(self.config.connect_timeout)
            .reconnect_delay_callback(|_attempts| RECONNECT_INTERVAL)
            .connect(self.config.url.as_str())
            .await?;

        *guard = Some(client.clone());
        Ok(client)
    }

    /// JetStream context over the (re)validated connection.
    pub async fn jetstream(&self) -> Result<jetstream::Context> {
        Ok(jetstream::new(self.client().await?))
    }

    /// Whether the current handle reports an open connection. Never
    /// attempts to reconnect.
    pub async fn is_open(&self) -> bool {
        let guard = self.connection.lock().await;
        matches!(
            guard.as_ref().map(Client::connection_state),
            Some(State::Connected)
        )
    }

    /// Declare the durable work queue `queue`, verifying its attributes
    /// if it already exists.
    pub async fn ensure_queue(&self, queue: &str) -> Result<()> {
        let js = self.jetstream().await?;
        ensure_work_queue(&js, queue).await
    }
}

/// Attributes every conveyor work queue is declared with: file-backed,
/// work-queue retention, one subject equal to the queue name.
fn work_queue_config(queue: &str) -> stream::Config {
    stream::Config {
        name: queue.to_string(),
        subjects: vec![queue.to_string()],
        retention: stream::RetentionPolicy::WorkQueue,
        storage: stream::StorageType::File,
        ..Default::default()
    }
}

/// Compare the attributes we declare against an existing stream's
/// configuration. Server-side tunables (limits, ack windows) are not part
/// of the queue's identity and are ignored here.
fn queue_attribute_conflict(existing: &stream::Config, desired: &stream::Config) -> Option<String> {
    if existing.subjects != desired.subjects {
        return Some(format!(
            "subjects {:?}, expected {:?}",
            existing.subjects, desired.subjects
        ));
    }
    if existing.retention != desired.retention {
        return Some(format!(
            "retention {:?}, expected {:?}",
            existing.retention, desired.retention
        ));
    }
    if existing.storage != desired.storage {
        return Some(format!(
            "storage {:?}, expected {:?}",
            existing.storage, desired.storage
        ));
    }
    None
}

/// Declare `queue` as a durable work-queue stream.
///
/// Declaring an existing queue with identical attributes is a no-op.
/// Conflicting attributes are reported as [`BrokerError::QueueConflict`],
/// never silently accepted.
pub(crate) async fn ensure_work_queue(js: &jetstream::Context, queue: &str) -> Result<()> {
    let desired = work_queue_config(queue);
    match js.get_stream(queue).await {
        Ok(existing) => {
            if let Some(conflict) =
                queue_attribute_conflict(&existing.cached_info().config, &desired)
            {
                return Err(BrokerError::QueueConflict {
                    queue: queue.to_string(),
                    conflict,
                });
            }
            debug!(queue, "work queue already declared");
            Ok(())
        }
        Err(_) => {
            js.create_stream(desired).await?;
            info!(queue, "declared durable work queue");
            Ok(())
        }
    }
}
