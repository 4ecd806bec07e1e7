// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Order processing pipeline.
//!
//! Each delivered payload passes four stages: parse the dispatch envelope,
//! parse the order payload inside it, validate the order, persist it. The
//! first failing stage produces the outcome; every outcome is a value, so
//! a business failure never bubbles up as an error to the consumer loop.

use std::sync::Arc;

use conveyor_transport::{DispatchEnvelope, ProcessingOutcome};
use tracing::{error, info};

use crate::orders::{OrderData, OrderStore};

/// Turns raw queue payloads into processing outcomes.
pub struct OrderProcessor {
    store: Arc<dyn OrderStore>,
}

impl OrderProcessor {
    /// Create a processor backed by the given order store.
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Process one raw payload and report the outcome.
    ///
    /// The returned outcome always carries the envelope's request id when
    /// the envelope itself was readable, so the producer can settle the
    /// matching outbox row even for failed orders.
    pub async fn process(&self, raw: &str) -> ProcessingOutcome {
        info!(payload_len = raw.len(), "Processing message");

        let envelope: DispatchEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = %err, "Failed to deserialize message");
                return ProcessingOutcome::failure(
                    None,
                    "Failed to deserialize message",
                    Some(err.to_string()),
                );
            }
        };

        let order: OrderData = match serde_json::from_str(&envelope.content) {
            Ok(order) => order,
            Err(err) => {
                error!(
                    request_id = %envelope.request_id,
                    error = %err,
                    "Invalid order data format"
                );
                return ProcessingOutcome::failure(
                    Some(envelope.request_id),
                    "Invalid order data format",
                    Some(err.to_string()),
                );
            }
        };

        if order.order_number.is_empty() {
            error!(request_id = %envelope.request_id, "Order validation failed");
            return ProcessingOutcome::failure(
                Some(envelope.request_id),
                "Order validation failed",
                Some("Missing required field: order number".to_string()),
            );
        }

        match self.store.save_order(&order).await {
            Ok(order_id) => {
                info!(
                    request_id = %envelope.request_id,
                    order_number = %order.order_number,
                    order_id,
                    "Order successfully processed"
                );
                ProcessingOutcome::success(
                    envelope.request_id,
                    order_id,
                    format!("Order {} successfully processed", order.order_number),
                )
            }
            Err(err) => {
                error!(
                    request_id = %envelope.request_id,
                    order_number = %order.order_number,
                    error = %err,
                    "Failed to save order to database"
                );
                ProcessingOutcome::failure(
                    Some(envelope.request_id),
                    "Failed to save order to database",
                    Some(err.to_string()),
                )
            }
        }
    }
}
