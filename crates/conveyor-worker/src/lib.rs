// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Worker - Order Processing Consumer
//!
//! This crate consumes dispatch envelopes from the durable processing queue
//! one at a time, runs each through the four-stage order processor, persists
//! accepted orders, and publishes the processing outcome back to the
//! submitter's reply inbox.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌─────────────────────────────────────────┐
//! │   Processing queue   │───────▶│         conveyor-worker (This Crate)    │
//! │   (NATS JetStream)   │        │  ┌────────────┐  ┌───────────────────┐  │
//! │                      │◀───────│  │  Consumer  │─▶│  Order Processor  │  │
//! └──────────────────────┘  reply │  │    Loop    │  │    (4 stages)     │  │
//!                           + ack │  └────────────┘  └─────────┬─────────┘  │
//!                                 │                            ▼            │
//!                                 │                  ┌───────────────────┐  │
//!                                 │                  │    Order Store    │  │
//!                                 │                  │ (Postgres/SQLite) │  │
//!                                 │                  └───────────────────┘  │
//!                                 └─────────────────────────────────────────┘
//! ```
//!
//! # Delivery contract
//!
//! The pull consumer runs with `max_ack_pending = 1` and fetches one message
//! at a time, so a second envelope is never seen while the first is still
//! being handled. Every handled envelope is acked exactly once, whether the
//! order was accepted or rejected; a business rejection is still a handled
//! outcome. Only unhandled faults (undecodable body, reply publish failure)
//! nack with requeue so the broker redelivers.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `WORKER_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `WORKER_BROKER_URL` | No | `nats://localhost:4222` | Broker URL |
//! | `WORKER_QUEUE` | No | `orders-processing` | Durable processing queue name |
//! | `WORKER_DURABLE_NAME` | No | `order-worker` | Durable pull consumer name |
//!
//! # Modules
//!
//! - [`config`]: Service configuration from environment variables
//! - [`consumer`]: Supervised consumer loop (fetch, process, reply, ack)
//! - [`error`]: Error types for worker operations
//! - [`migrations`]: Embedded database migrations
//! - [`orders`]: Order store over PostgreSQL or SQLite
//! - [`processor`]: Four-stage order processor

#![deny(missing_docs)]

/// Service configuration loaded from environment variables.
pub mod config;

/// Supervised consumer loop: fetch one, process, reply, settle.
pub mod consumer;

/// Error types for worker operations.
pub mod error;

/// Embedded database migrations for the orders schema.
pub mod migrations;

/// Order data and store implementations for PostgreSQL and SQLite.
pub mod orders;

/// Four-stage order processor (decode, parse, validate, persist).
pub mod processor;
