//! Pool error types

use thiserror::Error;

/// Errors reported by the worker pool primitives
#[derive(Debug, Error)]
pub enum PoolError {
    /// A worker or timer thread could not be started
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The pool has been closed and accepts no more callbacks
    #[error("Thread pool is closed")]
    Closed,

    /// Thread limits where the minimum exceeds the maximum
    #[error("Invalid thread limits: minimum {min} exceeds maximum {max}")]
    InvalidLimits {
        /// Requested minimum
        min: usize,
        /// Current maximum
        max: usize,
    },

    /// A usage cookie that was never issued or was already returned
    #[error("Unknown usage cookie: {0}")]
    UnknownUsageCookie(u64),
}
