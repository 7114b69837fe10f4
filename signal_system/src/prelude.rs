//! Convenience re-exports for common signal-system usage

// Core signal system components
pub use crate::errors::SignalError;
pub use crate::event::LockEvent;
pub use crate::manager::SignalManager;
pub use crate::memory::{MemoryBus, MemoryPubSub};
pub use crate::redis_pubsub::RedisPubSub;
pub use crate::registry::{Subscription, WaitRegistry};
pub use crate::transport::PubSubTransport;

// Common external dependencies
pub use async_trait::async_trait;
pub use tokio;
