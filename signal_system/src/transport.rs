//! Pub/sub transport abstraction

use crate::errors::SignalError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Fleet-wide broadcast channel
///
/// Implementations deliver every message received on a subscribed channel
/// to the [`WaitRegistry`](crate::WaitRegistry) they were built with.
#[async_trait]
pub trait PubSubTransport: Send + Sync + Debug {
    /// Start receiving messages for `channel`. Subscribing twice is harmless.
    async fn subscribe(&self, channel: &str) -> Result<(), SignalError>;

    /// Stop receiving messages for `channel`. Unknown channels are ignored.
    async fn unsubscribe(&self, channel: &str) -> Result<(), SignalError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), SignalError>;

    /// Unsubscribe from everything and close connections
    async fn shutdown(&self) -> Result<(), SignalError>;
}
