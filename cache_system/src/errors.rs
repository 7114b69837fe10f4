//! Error types for cache operations
//!
//! This module defines all error types that can occur
//! during key-value store operations and Redis interactions.

use thiserror::Error;

/// Cache system errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    ConnectionError(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Value at {0} is not an integer")]
    NotAnInteger(String),

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Invalid TTL value: {0}")]
    InvalidTtl(u64),

    #[error("Store is closed")]
    Closed,
}

/// True when the error means the cached connection is dead and must be reopened
pub fn is_connection_lost(error: &redis::RedisError) -> bool {
    error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_connection_loss_classification() {
        let reset = redis::RedisError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(is_connection_lost(&reset));

        let broken = redis::RedisError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(is_connection_lost(&broken));

        let wrong_type = redis::RedisError::from((redis::ErrorKind::TypeError, "not a string"));
        assert!(!is_connection_lost(&wrong_type));
    }
}
