//! Scheduler error types

use rtwq_pool::PoolError;
use thiserror::Error;

/// Errors reported by the work queue platform
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RtwqError {
    /// Unknown, stale or unresolvable queue id
    #[error("Invalid work queue")]
    InvalidQueue,

    /// The platform is not started or is tearing down
    #[error("Work queue platform is shut down")]
    ShuttingDown,

    /// Queue slots or threads are exhausted
    #[error("Out of resources")]
    OutOfResources,

    /// No pending work item matches the key
    #[error("Work item not found")]
    NotFound,

    /// Operation is deliberately not implemented
    #[error("Operation not supported")]
    Unsupported,

    /// Status of a result whose work item was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The result carries no associated object
    #[error("Result has no associated object")]
    NoObject,
}

/// Result type for work queue operations
pub type RtwqResult<T> = Result<T, RtwqError>;

impl From<PoolError> for RtwqError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Spawn(_) | PoolError::InvalidLimits { .. } => RtwqError::OutOfResources,
            PoolError::Closed => RtwqError::ShuttingDown,
            PoolError::UnknownUsageCookie(_) => RtwqError::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_mapping() {
        assert_eq!(RtwqError::from(PoolError::Closed), RtwqError::ShuttingDown);
        assert_eq!(
            RtwqError::from(PoolError::InvalidLimits { min: 2, max: 1 }),
            RtwqError::OutOfResources
        );
        let spawn = PoolError::Spawn(std::io::Error::other("no threads"));
        assert_eq!(RtwqError::from(spawn), RtwqError::OutOfResources);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(RtwqError::NotFound.to_string(), "Work item not found");
        assert_eq!(RtwqError::InvalidQueue.to_string(), "Invalid work queue");
    }
}
