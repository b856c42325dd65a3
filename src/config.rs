// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Engine configuration.
//!
//! Everything here is fixed for the lifetime of an engine: the queue
//! variant is baked into every thread context at creation and the timestamp
//! mode is resolved once at startup, never mid-run.

use crate::clock;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest allowed queue capacity: one cache line, enough for any
/// argument-free record.
pub const MIN_QUEUE_CAPACITY: usize = 64;

/// Per-thread queue variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueKind {
    /// Grows by doubling segments; `prepare_write` never fails.
    Unbounded { initial_capacity: usize },
    /// Fixed capacity; full-queue writes are dropped and counted.
    Bounded { capacity: usize },
}

impl QueueKind {
    fn capacity(self) -> usize {
        match self {
            QueueKind::Unbounded { initial_capacity } => initial_capacity,
            QueueKind::Bounded { capacity } => capacity,
        }
    }
}

/// What producers stamp into record headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampMode {
    /// Raw CPU cycle counts, converted to wall time by the backend's
    /// calibrated clock. The cheapest read on the hot path.
    Tsc,
    /// Nanoseconds since the Unix epoch from the system clock.
    Wall,
}

impl TimestampMode {
    /// Resolve against the target: without a cycle counter, `Tsc` falls
    /// back to `Wall` at startup (never during operation).
    pub fn resolve(self) -> TimestampMode {
        match self {
            TimestampMode::Tsc if !clock::cycle_counter_available() => TimestampMode::Wall,
            other => other,
        }
    }

    /// Producer-side timestamp read.
    #[inline(always)]
    pub(crate) fn now(self) -> u64 {
        match self {
            TimestampMode::Tsc => clock::raw_cycles(),
            TimestampMode::Wall => clock::wall_nanos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Queue variant for every producer thread
    pub queue: QueueKind,
    /// How long the backend sleeps when every queue is empty
    pub backend_sleep: Duration,
    /// Pending-event bound: the backend stops polling producers while its
    /// heap holds this many events and works the backlog down first
    pub max_transit_events: usize,
    /// Records decoded per context per poll iteration (fairness bound)
    pub poll_batch: usize,
    pub timestamp_mode: TimestampMode,
    /// How often the backend re-anchors cycle-to-wall conversion
    pub tsc_resync_interval: Duration,
    pub backend_thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueKind::Unbounded {
                initial_capacity: 64 * 1024,
            },
            backend_sleep: Duration::from_micros(100),
            max_transit_events: 800,
            poll_batch: 256,
            timestamp_mode: TimestampMode::Tsc,
            tsc_resync_interval: Duration::from_millis(700),
            backend_thread_name: "fastlog-backend".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.queue.capacity();
        if !capacity.is_power_of_two() {
            return Err(ConfigError::CapacityNotPowerOfTwo(capacity));
        }
        if capacity < MIN_QUEUE_CAPACITY {
            return Err(ConfigError::CapacityTooSmall {
                got: capacity,
                min: MIN_QUEUE_CAPACITY,
            });
        }
        Ok(())
    }
}
