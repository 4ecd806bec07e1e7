// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Ingress - Reliable Submission Intake
//!
//! This crate receives external JSON submissions, records each one in a
//! durable outbox, dispatches it to the order worker over the processing
//! queue, and answers the submitter with the worker's outcome. Records
//! that time out stay retryable and are drained by a periodic reconciler.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        External Submitters                               │
//! │                   (authenticated HTTP front door)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     conveyor-ingress (This Crate)                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │     HTTP     │  │   Ingress    │  │    Outbox    │  │    Retry    │  │
//! │  │   Receiver   │─▶│ Orchestrator │─▶│    Store     │◀─│ Reconciler  │  │
//! │  └──────────────┘  └──────┬───────┘  └──────────────┘  └─────────────┘  │
//! └───────────────────────────┼──────────────────────────────────────────────┘
//!                             │ publish + await reply (15s)
//!                             ▼
//!                  ┌──────────────────────┐        ┌─────────────────────┐
//!                  │   Processing queue   │───────▶│   conveyor-worker   │
//!                  │   (NATS JetStream)   │◀───────│  (order processor)  │
//!                  └──────────────────────┘  reply └─────────────────────┘
//! ```
//!
//! # Outbox lifecycle
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `PENDING` | Recorded, not yet confirmed by the worker; eligible for retry once `next_retry_at` passes |
//! | `PROCESSED` | Worker confirmed success; terminal |
//! | `FAILED` | Worker reported a business failure or publishing faulted; kept with error detail |
//!
//! A reply timeout never marks a record `FAILED`: the retry count is
//! incremented, the next attempt is scheduled with capped exponential
//! backoff and jitter, and the record stays `PENDING` for the reconciler.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `INGRESS_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `INGRESS_BROKER_URL` | No | `nats://localhost:4222` | Broker URL |
//! | `INGRESS_QUEUE` | No | `orders-processing` | Durable processing queue name |
//! | `INGRESS_RESPONSE_QUEUE` | No | - | Optional durable response queue to declare |
//! | `INGRESS_HTTP_PORT` | No | `8080` | HTTP listener port |
//! | `INGRESS_REPLY_TIMEOUT_SECS` | No | `15` | Reply wait per dispatch |
//! | `INGRESS_RETRY_POLL_INTERVAL_SECS` | No | `30` | Reconciler poll interval |
//! | `INGRESS_RETRY_BATCH_SIZE` | No | `50` | Max due records per reconciler poll |
//!
//! # Modules
//!
//! - [`backoff`]: Retry delay math (capped exponential with jitter)
//! - [`config`]: Service configuration from environment variables
//! - [`error`]: Error types for ingress operations
//! - [`http`]: HTTP receiver endpoints
//! - [`migrations`]: Embedded database migrations
//! - [`orchestrator`]: Submission pipeline (store, dispatch, settle)
//! - [`reconciler`]: Periodic redispatch of due retries
//! - [`store`]: Outbox store over PostgreSQL or SQLite

#![deny(missing_docs)]

/// Retry delay math: capped exponential backoff with uniform jitter.
pub mod backoff;

/// Service configuration loaded from environment variables.
pub mod config;

/// Error types for ingress operations.
pub mod error;

/// HTTP receiver endpoints (submission intake, status lookup, health).
pub mod http;

/// Embedded database migrations for the outbox schema.
pub mod migrations;

/// Submission pipeline: persist, dispatch, settle the outbox envelope.
pub mod orchestrator;

/// Background loop that redispatches due PENDING records.
pub mod reconciler;

/// Outbox store implementations for PostgreSQL and SQLite.
pub mod store;
