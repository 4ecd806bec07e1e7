// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry delay math.
//!
//! Delays grow exponentially from a five second base and cap at one hour.
//! Each computed delay is perturbed by ±20% uniform jitter so a burst of
//! simultaneous failures does not come back as a synchronized retry storm.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Base delay in seconds for retry exponent zero.
pub const BASE_DELAY_SECS: u64 = 5;

/// Upper bound on any retry delay, in seconds.
pub const MAX_DELAY_SECS: u64 = 3600;

/// Jitter applied around the base delay, as a fraction of it.
pub const JITTER_RATIO: f64 = 0.2;

/// Records at or beyond this retry count are no longer redispatched.
pub const MAX_RETRY_COUNT: i32 = 10;

/// Deterministic delay for `retry_count`, before jitter:
/// `min(2^retry_count * 5, 3600)` seconds.
pub fn base_delay(retry_count: i32) -> Duration {
    let exponent = retry_count.clamp(0, 30) as u32;
    let secs = (1u64 << exponent)
        .saturating_mul(BASE_DELAY_SECS)
        .min(MAX_DELAY_SECS);
    Duration::from_secs(secs)
}

/// [`base_delay`] perturbed by uniform jitter in `[1 - JITTER_RATIO, 1 + JITTER_RATIO]`.
pub fn jittered_delay(retry_count: i32) -> Duration {
    let base = base_delay(retry_count).as_secs_f64();
    let factor = rand::thread_rng().gen_range(1.0 - JITTER_RATIO..=1.0 + JITTER_RATIO);
    Duration::from_secs_f64(base * factor)
}

/// Wall-clock instant of the next attempt for `retry_count`, measured from `now`.
pub fn next_retry_at(now: DateTime<Utc>, retry_count: i32) -> DateTime<Utc> {
    let delay = jittered_delay(retry_count);
    now + chrono::Duration::milliseconds(delay.as_millis() as i64)
}
