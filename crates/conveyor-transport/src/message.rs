// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire messages exchanged over the work queue and reply inboxes.
//!
//! Both messages are JSON with camelCase field names. The dispatch
//! envelope carries an opaque `content` string; the nested domain payload
//! inside it is parsed by the worker, not by this layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type announced on every published dispatch message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Header carrying the generated per-message id (also used by the broker
/// for duplicate detection within its dedupe window).
pub const HEADER_MSG_ID: &str = "Nats-Msg-Id";

/// Header carrying the payload content type.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Header naming the reply inbox for this dispatch, when the producer
/// expects an outcome. JetStream reserves the core reply field for its
/// own acknowledgments, so the reply address travels as a header.
pub const HEADER_REPLY_TO: &str = "X-Reply-To";

/// Message published to the durable processing queue.
///
/// Only a subset of the persisted request crosses the wire; the full
/// record (headers, content type, outbox envelope) stays in the ingress
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEnvelope {
    /// Caller-visible request id, unique per submission.
    pub request_id: String,
    /// Opaque payload string, itself carrying the nested domain payload.
    pub content: String,
    /// When the submission was received by the ingress service.
    pub request_date: DateTime<Utc>,
    /// Origin tag of the submission.
    pub source: String,
}

/// Result of processing one dispatched message, published back to the
/// reply inbox named in the originating message (or dropped when the
/// producer did not ask for a reply).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOutcome {
    /// Request id echoed from the envelope. `None` when the envelope
    /// itself could not be parsed.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Whether the order was persisted.
    pub success: bool,
    /// Human-readable outcome message.
    pub message: String,
    /// Underlying error detail for failed outcomes.
    #[serde(default)]
    pub error_details: Option<String>,
    /// When the worker finished processing.
    pub processed_at: DateTime<Utc>,
    /// Generated order id for successful outcomes.
    #[serde(default)]
    pub order_id: Option<i64>,
}

impl ProcessingOutcome {
    /// Successful outcome with the generated order id.
    pub fn success(
        request_id: impl Into<String>,
        order_id: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Some(request_id.into()),
            success: true,
            message: message.into(),
            error_details: None,
            processed_at: Utc::now(),
            order_id: Some(order_id),
        }
    }

    /// Failed outcome. `request_id` is absent only when the envelope was
    /// structurally unreadable.
    pub fn failure(
        request_id: Option<String>,
        message: impl Into<String>,
        error_details: Option<String>,
    ) -> Self {
        Self {
            request_id,
            success: false,
            message: message.into(),
            error_details,
            processed_at: Utc::now(),
            order_id: None,
        }
    }
}
