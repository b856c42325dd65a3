// SPDX-License-Identifier: Apache-2.0 OR MIT
// Synchronous configuration errors reported to callers

use thiserror::Error;

/// Errors reported synchronously to the caller. Runtime faults that cannot
/// corrupt the record stream (queue-full, handler failures) are not errors;
/// they are counted or routed to the diagnostic side-channel instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `Level::Backtrace` marks backtrace statements internally and cannot
    /// be used as a logger threshold.
    #[error("log level `Backtrace` is reserved for backtrace statements and cannot be set as a threshold")]
    ReservedLevel,

    /// Queue capacities must be powers of two so producer and consumer
    /// offsets stay cheap to wrap.
    #[error("queue capacity must be a power of two, got {0}")]
    CapacityNotPowerOfTwo(usize),

    /// A queue must be able to hold at least one maximum-size record header.
    #[error("queue capacity {got} is below the minimum of {min} bytes")]
    CapacityTooSmall { got: usize, min: usize },

    #[error("backtrace capacity must be non-zero")]
    EmptyBacktrace,

    #[error("failed to spawn backend thread: {0}")]
    BackendSpawn(String),
}
