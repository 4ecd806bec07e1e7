// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry reconciler for the outbox.
//!
//! Periodically polls for PENDING records whose `next_retry_at` has passed
//! and redispatches them through the orchestrator. Records that exhausted
//! the retry cap are left alone; the due-retries query filters them out.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::orchestrator::RequestOrchestrator;
use crate::store::OutboxStore;

/// Retry reconciler configuration.
#[derive(Debug, Clone)]
pub struct RetryReconcilerConfig {
    /// How often to poll for due retries
    pub poll_interval: Duration,
    /// Maximum records to redispatch per poll
    pub batch_size: i64,
}

impl Default for RetryReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

/// Retry reconciler that runs as a background task.
pub struct RetryReconciler {
    store: Arc<dyn OutboxStore>,
    orchestrator: Arc<RequestOrchestrator>,
    config: RetryReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl RetryReconciler {
    /// Create a new retry reconciler.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        orchestrator: Arc<RequestOrchestrator>,
        config: RetryReconcilerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reconciler loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Retry reconciler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Retry reconciler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.process_due_retries().await {
                        error!(error = %e, "Failed to process due retries");
                    }
                }
            }
        }
    }

    /// Redispatch every record whose retry is due.
    async fn process_due_retries(&self) -> crate::error::Result<()> {
        let due = self.store.find_due_retries(self.config.batch_size).await?;

        if due.is_empty() {
            debug!("No due retries to process");
            return Ok(());
        }

        info!(count = due.len(), "Redispatching due retries");

        for record in due {
            match self.orchestrator.resubmit(&record).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    warn!(
                        request_id = %record.request_id,
                        message = %outcome.message,
                        "Redispatch not confirmed"
                    );
                }
                Err(e) => {
                    error!(
                        request_id = %record.request_id,
                        error = %e,
                        "Failed to redispatch request"
                    );
                    // Continue processing other records
                }
            }
        }

        Ok(())
    }
}
