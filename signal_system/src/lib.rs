//! Signal system for lock wake-ups
//!
//! This crate carries lock events between processes over pub/sub and
//! hands them to local waiters through a per-channel one-shot registry.

/// Conditional debug logging macro
/// Only compiled in when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

pub mod errors;
pub mod event;
pub mod manager;
pub mod memory;
pub mod prelude;
pub mod redis_pubsub;
pub mod registry;
pub mod transport;

pub use errors::SignalError;
pub use event::LockEvent;
pub use manager::SignalManager;
pub use memory::{MemoryBus, MemoryPubSub};
pub use redis_pubsub::RedisPubSub;
pub use registry::{Subscription, WaitRegistry};
pub use transport::PubSubTransport;
