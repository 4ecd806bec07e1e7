// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP receiver endpoints.
//!
//! Thin glue over the orchestrator: the handlers validate the body, capture
//! request metadata, and translate the processing outcome into a response.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::orchestrator::RequestOrchestrator;
use crate::store::{NewRequest, OutboxStore, RequestRecord};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Submission pipeline.
    pub orchestrator: Arc<RequestOrchestrator>,
    /// Outbox store, for status lookups and health checks.
    pub store: Arc<dyn OutboxStore>,
}

/// Build the receiver router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/receiver/receive", post(receive))
        .route("/api/receiver/status/{request_id}", get(status))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveAccepted {
    request_id: Option<String>,
    status: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveFailed {
    request_id: Option<String>,
    status: &'static str,
    error: String,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestStatus {
    request_id: String,
    status: String,
    source: String,
    retry_count: i32,
    request_date: DateTime<Utc>,
    last_retry_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    next_retry_at: DateTime<Utc>,
    error_details: Option<String>,
}

impl From<RequestRecord> for RequestStatus {
    fn from(record: RequestRecord) -> Self {
        Self {
            request_id: record.request_id,
            status: record.status,
            source: record.source,
            retry_count: record.retry_count,
            request_date: record.request_date,
            last_retry_at: record.last_retry_at,
            processed_at: record.processed_at,
            next_retry_at: record.next_retry_at,
            error_details: record.error_details,
        }
    }
}

async fn receive(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    info!("Received a new JSON request");

    if body.trim().is_empty() {
        warn!("Received empty JSON content");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "JSON content cannot be empty"})),
        )
            .into_response();
    }

    let mut request = NewRequest::new(body);
    request.content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    request.content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    request.headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    match state.orchestrator.submit(&request).await {
        Ok(outcome) if outcome.success => (
            StatusCode::OK,
            Json(ReceiveAccepted {
                request_id: outcome.request_id,
                status: "Processed",
                message: outcome.message,
            }),
        )
            .into_response(),
        Ok(outcome) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReceiveFailed {
                request_id: outcome.request_id,
                status: "Failed",
                error: outcome
                    .error_details
                    .unwrap_or_else(|| "An error occurred during processing".to_string()),
                message: outcome.message,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Error processing JSON request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "An error occurred while processing the request",
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn status(State(state): State<AppState>, Path(request_id): Path<String>) -> Response {
    match state.store.find_by_request_id(&request_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(RequestStatus::from(record))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("No request found with ID {request_id}")})),
        )
            .into_response(),
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Error getting request status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(true) => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Ok(false) | Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable"})),
        )
            .into_response(),
    }
}
