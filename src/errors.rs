//! Error types for the stampede guard
//!
//! Each variant is one failure kind the coordinator distinguishes internally.
//! None of them reach the end caller: the request handler collapses them all
//! into one fixed failure response and keeps the kind for logs.

use cache_system::CacheError;
use config::ConfigError;
use lock_system::LockError;
use signal_system::SignalError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StampedeError {
    #[error("Cache key generation failed: {0}")]
    KeyGeneration(#[source] anyhow::Error),

    #[error("Callback execution failed. Retried {attempts} times.")]
    GeneratorExhausted { attempts: u32 },

    /// The resource is locked by another generator
    #[error("Lock is held elsewhere: {0}")]
    LockQuorumTimeout(#[source] LockError),

    #[error("Lock infrastructure failure: {0}")]
    LockInfrastructure(#[source] LockError),

    #[error(
        "Maximum time limit reaching waiting for cache unlock event on {channel} after {waited_ms}ms. Please check if event publish process is active."
    )]
    EventPollTimeout { channel: String, waited_ms: u64 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] CacheError),

    #[error("Lock holder reported {event} on {channel}")]
    LockHolderFailed { channel: String, event: String },

    #[error("Pub/sub failure: {0}")]
    PubSub(#[source] SignalError),

    #[error("Listener for {0} was detached during shutdown")]
    ListenerDetached(String),

    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordinator is shut down")]
    ShutDown,
}

impl StampedeError {
    /// Stable code for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StampedeError::KeyGeneration(_) => "key_generation",
            StampedeError::GeneratorExhausted { .. } => "generator_exhausted",
            StampedeError::LockQuorumTimeout(_) => "lock_quorum_timeout",
            StampedeError::LockInfrastructure(_) => "lock_infrastructure",
            StampedeError::EventPollTimeout { .. } => "poll_timeout",
            StampedeError::StoreUnavailable(_) => "store_unavailable",
            StampedeError::LockHolderFailed { .. } => "lock_holder_failed",
            StampedeError::PubSub(_) => "pubsub",
            StampedeError::ListenerDetached(_) => "listener_detached",
            StampedeError::Serialization(_) => "serialization",
            StampedeError::Config(_) => "config",
            StampedeError::ShutDown => "shut_down",
        }
    }

    /// True for lock failures that mean "wait for the holder"
    pub fn is_contention(&self) -> bool {
        matches!(self, StampedeError::LockQuorumTimeout(_))
    }
}

impl From<LockError> for StampedeError {
    fn from(error: LockError) -> Self {
        if error.is_contention() {
            StampedeError::LockQuorumTimeout(error)
        } else {
            StampedeError::LockInfrastructure(error)
        }
    }
}

impl From<CacheError> for StampedeError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::SerializationError(e) => StampedeError::Serialization(e),
            other => StampedeError::StoreUnavailable(other),
        }
    }
}

impl From<SignalError> for StampedeError {
    fn from(error: SignalError) -> Self {
        match error {
            SignalError::Detached(channel) => StampedeError::ListenerDetached(channel),
            other => StampedeError::PubSub(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_errors_are_classified() {
        let contention: StampedeError = LockError::QuorumNotReached { attempts: 1 }.into();
        assert!(contention.is_contention());
        assert_eq!(contention.kind(), "lock_quorum_timeout");

        let broken: StampedeError = LockError::Infrastructure("down".into()).into();
        assert!(!broken.is_contention());
        assert_eq!(broken.kind(), "lock_infrastructure");
    }

    #[test]
    fn test_store_errors_are_classified() {
        let unavailable: StampedeError = CacheError::Timeout.into();
        assert_eq!(unavailable.kind(), "store_unavailable");

        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let serialization: StampedeError = CacheError::SerializationError(bad_json).into();
        assert_eq!(serialization.kind(), "serialization");
    }

    #[test]
    fn test_detached_listener_keeps_channel() {
        let error: StampedeError = SignalError::Detached("chan".into()).into();
        assert!(matches!(error, StampedeError::ListenerDetached(ref c) if c == "chan"));
    }

    #[test]
    fn test_exhausted_message_carries_attempts() {
        let error = StampedeError::GeneratorExhausted { attempts: 4 };
        assert_eq!(error.to_string(), "Callback execution failed. Retried 4 times.");
    }
}
