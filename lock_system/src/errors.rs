//! Error types for lock operations

use thiserror::Error;

/// Message carried by a lock attempt that lost the vote
pub const QUORUM_FAILURE_MESSAGE: &str =
    "The operation was unable to achieve a quorum during its retry window.";

#[derive(Error, Debug)]
pub enum LockError {
    /// The resource is held elsewhere, or too few nodes agreed in time
    #[error("{msg} (attempts: {attempts})", msg = QUORUM_FAILURE_MESSAGE)]
    QuorumNotReached { attempts: u32 },

    /// The lock substrate itself is broken
    #[error("Lock infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid lock TTL: {0}ms")]
    InvalidTtl(u128),

    #[error("At least one lock node is required")]
    NoNodes,
}

impl LockError {
    /// True when the failure means "someone else holds it", which callers may wait out
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::QuorumNotReached { .. })
    }
}

/// True when the error means a node connection is dead and must be reopened
pub(crate) fn is_connection_lost(error: &redis::RedisError) -> bool {
    error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_dropped_connection_is_lost() {
        let reset = redis::RedisError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(is_connection_lost(&reset));

        let script = redis::RedisError::from((redis::ErrorKind::ResponseError, "ERR script"));
        assert!(!is_connection_lost(&script));
    }

    #[test]
    fn test_only_quorum_loss_is_contention() {
        assert!(LockError::QuorumNotReached { attempts: 1 }.is_contention());
        assert!(!LockError::Infrastructure("down".into()).is_contention());
        assert!(!LockError::NoNodes.is_contention());
    }
}
