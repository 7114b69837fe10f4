//! Error types for pub/sub operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Redis pub/sub error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Subscription to {0} failed: {1}")]
    Subscribe(String, String),

    #[error("Listener for {0} was detached before an event arrived")]
    Detached(String),

    #[error("Pub/sub transport is shut down")]
    ShutDown,
}
