// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Transport - JetStream work queues and reply-channel RPC
//!
//! This crate provides the broker layer shared by the conveyor services:
//! - The ingress service publishes dispatch envelopes and awaits processing
//!   outcomes on a per-call reply inbox (RPC over the work queue).
//! - The worker service consumes the durable work queue one delivery at a
//!   time and publishes outcomes back to the reply inbox named by the
//!   producer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   conveyor-transport                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: publish + per-call reply inbox with timeout     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Consumer: durable pull consumer, one unacked delivery      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Broker: guarded lazy connection + work-queue streams       │
//! │  Transport: NATS JetStream (async-nats)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Delivery semantics
//!
//! The work queue is a file-backed JetStream stream with work-queue
//! retention. Deliveries are at-least-once: the worker acknowledges a
//! message only after producing an outcome, and negatively acknowledges
//! (requeue) on transport-level faults. Replies travel over plain core
//! NATS inboxes and are best-effort by design; the ingress outbox is the
//! recovery path when a reply is lost.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod message;
pub mod rpc;

pub use broker::{BrokerClient, BrokerConfig};
pub use consumer::{Delivery, JetStreamDelivery, QueueConsumer};
pub use error::{BrokerError, Result};
pub use message::{DispatchEnvelope, ProcessingOutcome};
pub use rpc::{DEFAULT_RPC_TIMEOUT, DispatchChannel, ReplyPublisher, RpcChannel};

#[cfg(any(test, feature = "testing"))]
pub use consumer::MockDelivery;
#[cfg(any(test, feature = "testing"))]
pub use rpc::{MockDispatchChannel, MockReplyPublisher};
