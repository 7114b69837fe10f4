//! In-memory pub/sub bus
//!
//! One [`MemoryBus`] stands in for the shared broker; each attached
//! [`MemoryPubSub`] plays one process with its own registry. Delivery is
//! synchronous inside `publish`.

use crate::errors::SignalError;
use crate::registry::WaitRegistry;
use crate::transport::PubSubTransport;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug)]
struct MemoryNode {
    registry: Weak<WaitRegistry>,
    channels: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
pub struct MemoryBus {
    nodes: Mutex<Vec<Arc<MemoryNode>>>,
    drop_messages: AtomicBool,
    refuse_subscriptions: AtomicBool,
    published: Mutex<Vec<(String, String)>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect a process-local registry to the bus
    pub fn attach(self: &Arc<Self>, registry: &Arc<WaitRegistry>) -> MemoryPubSub {
        let node = Arc::new(MemoryNode {
            registry: Arc::downgrade(registry),
            channels: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        });
        self.nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(node.clone());

        MemoryPubSub {
            bus: self.clone(),
            node,
        }
    }

    /// Record publishes but deliver nothing, simulating lost messages
    pub fn set_drop_messages(&self, drop_messages: bool) {
        self.drop_messages.store(drop_messages, Ordering::SeqCst);
    }

    /// Fail every subscribe call, simulating a lost subscriber connection
    pub fn set_refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscriptions.store(refuse, Ordering::SeqCst);
    }

    /// Every `(channel, message)` published so far, delivered or not
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn deliver(&self, channel: &str, message: &str) -> usize {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner()).clone();
        nodes
            .iter()
            .filter(|node| !node.closed.load(Ordering::SeqCst))
            .filter(|node| {
                node.channels
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains(channel)
            })
            .filter_map(|node| node.registry.upgrade())
            .map(|registry| registry.dispatch(channel, message))
            .sum()
    }
}

/// One process's connection to a [`MemoryBus`]
#[derive(Debug)]
pub struct MemoryPubSub {
    bus: Arc<MemoryBus>,
    node: Arc<MemoryNode>,
}

impl MemoryPubSub {
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.node
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(channel)
    }

    pub fn subscribed_count(&self) -> usize {
        self.node
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl PubSubTransport for MemoryPubSub {
    async fn subscribe(&self, channel: &str) -> Result<(), SignalError> {
        if self.node.closed.load(Ordering::SeqCst) {
            return Err(SignalError::ShutDown);
        }
        if self.bus.refuse_subscriptions.load(Ordering::SeqCst) {
            return Err(SignalError::Subscribe(
                channel.to_string(),
                "memory bus refused the subscription".to_string(),
            ));
        }
        self.node
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), SignalError> {
        self.node
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), SignalError> {
        if self.node.closed.load(Ordering::SeqCst) {
            return Err(SignalError::ShutDown);
        }
        self.bus
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((channel.to_string(), message.to_string()));

        if !self.bus.drop_messages.load(Ordering::SeqCst) {
            let _woken = self.bus.deliver(channel, message);
            debug_log!(channel, message, woken = _woken, "published on memory bus");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SignalError> {
        self.node.closed.store(true, Ordering::SeqCst);
        self.node
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LockEvent;
    use crate::manager::SignalManager;

    fn process(bus: &Arc<MemoryBus>) -> SignalManager {
        let registry = WaitRegistry::new();
        let transport = Arc::new(bus.attach(&registry));
        SignalManager::new(registry, transport)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribed_processes_only() {
        let bus = MemoryBus::new();
        let holder = process(&bus);
        let waiter = process(&bus);
        let bystander = process(&bus);

        let mut subscription = waiter.listen("lock:users").await.unwrap();
        let _other = bystander.listen("lock:orders").await.unwrap();

        holder.emit("lock:users", LockEvent::Unlocked).await.unwrap();

        assert_eq!(subscription.recv().await.unwrap(), LockEvent::Unlocked);
        assert_eq!(bystander.registry().waiter_count(), 1);
        assert_eq!(
            bus.published(),
            vec![("lock:users".to_string(), "unlocked".to_string())]
        );
    }

    #[tokio::test]
    async fn test_dropped_messages_are_recorded_not_delivered() {
        let bus = MemoryBus::new();
        let holder = process(&bus);
        let waiter = process(&bus);
        bus.set_drop_messages(true);

        let _subscription = waiter.listen("lock:users").await.unwrap();
        holder.emit("lock:users", LockEvent::Error).await.unwrap();

        assert_eq!(waiter.registry().waiter_count(), 1);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_detaches_waiters() {
        let bus = MemoryBus::new();
        let node = process(&bus);
        let mut subscription = node.listen("lock:users").await.unwrap();

        node.shutdown().await.unwrap();
        node.shutdown().await.unwrap();

        assert!(matches!(subscription.recv().await, Err(SignalError::Detached(_))));
        assert!(matches!(
            node.listen("lock:users").await,
            Err(SignalError::ShutDown)
        ));
    }
}
