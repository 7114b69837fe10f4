use crate::errors::SignalError;
use crate::event::LockEvent;
use crate::registry::{Subscription, WaitRegistry};
use crate::transport::PubSubTransport;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Signal manager for lock event notifications
///
/// Pairs the local [`WaitRegistry`] with the transport that feeds it. A
/// channel stays subscribed only while someone in this process waits on it:
/// once its last wait is answered or dropped, a background task
/// unsubscribes it.
#[derive(Clone)]
pub struct SignalManager {
    registry: Arc<WaitRegistry>,
    transport: Arc<dyn PubSubTransport>,
    /// Serializes subscribe and unsubscribe decisions
    gate: Arc<Mutex<()>>,
    janitor: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for SignalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalManager")
            .field("pending_waiters", &self.registry.waiter_count())
            .field("transport", &self.transport)
            .finish()
    }
}

impl SignalManager {
    /// `transport` must dispatch into `registry`
    pub fn new(registry: Arc<WaitRegistry>, transport: Arc<dyn PubSubTransport>) -> Self {
        Self {
            registry,
            transport,
            gate: Arc::new(Mutex::new(())),
            janitor: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Register a wait on `channel`, then subscribe to it
    ///
    /// Registration comes first so an event racing the subscription reply
    /// cannot slip past.
    pub async fn listen(&self, channel: &str) -> Result<Subscription, SignalError> {
        let _gate = self.gate.lock().await;
        self.start_janitor();

        let subscription = self.registry.register(channel);
        self.transport.subscribe(channel).await?;
        debug_log!(channel, "listening for lock event");
        Ok(subscription)
    }

    /// Publish a lock event to every process
    pub async fn emit(&self, channel: &str, event: LockEvent) -> Result<(), SignalError> {
        self.transport.publish(channel, event.as_str()).await
    }

    /// Stop the transport and detach every local waiter
    pub async fn shutdown(&self) -> Result<(), SignalError> {
        let janitor = self
            .janitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(janitor) = janitor {
            janitor.abort();
        }

        let result = self.transport.shutdown().await;
        self.registry.clear();
        result
    }

    pub fn registry(&self) -> &Arc<WaitRegistry> {
        &self.registry
    }

    /// Spawn the unsubscribe task on first use, inside the caller's runtime
    fn start_janitor(&self) {
        let mut janitor = self.janitor.lock().unwrap_or_else(|e| e.into_inner());
        if janitor.is_some() {
            return;
        }

        let idle = self.registry.watch_idle();
        *janitor = Some(tokio::spawn(release_idle_channels(
            idle,
            Arc::downgrade(&self.registry),
            self.transport.clone(),
            self.gate.clone(),
        )));
    }
}

async fn release_idle_channels(
    mut idle: mpsc::UnboundedReceiver<String>,
    registry: Weak<WaitRegistry>,
    transport: Arc<dyn PubSubTransport>,
    gate: Arc<Mutex<()>>,
) {
    while let Some(channel) = idle.recv().await {
        let _gate = gate.lock().await;
        let Some(registry) = registry.upgrade() else {
            break;
        };
        // A new wait registered since the channel went idle keeps it
        if registry.has_waiters(&channel) {
            continue;
        }
        match transport.unsubscribe(&channel).await {
            Ok(()) => {
                debug_log!(channel = %channel, "unsubscribed idle channel");
            }
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "failed to unsubscribe idle channel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBus, MemoryPubSub};

    fn process(bus: &Arc<MemoryBus>) -> (SignalManager, Arc<MemoryPubSub>) {
        let registry = WaitRegistry::new();
        let transport = Arc::new(bus.attach(&registry));
        (SignalManager::new(registry, transport.clone()), transport)
    }

    /// Let the unsubscribe task catch up
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_answered_channel_is_unsubscribed() {
        let bus = MemoryBus::new();
        let (holder, _) = process(&bus);
        let (waiter, transport) = process(&bus);

        for i in 0..100 {
            let channel = format!("lock:{}", i);
            let mut subscription = waiter.listen(&channel).await.unwrap();
            assert!(transport.is_subscribed(&channel));
            holder.emit(&channel, LockEvent::Unlocked).await.unwrap();
            assert_eq!(subscription.recv().await.unwrap(), LockEvent::Unlocked);
        }
        settle().await;

        assert_eq!(waiter.registry().waiter_count(), 0);
        assert_eq!(transport.subscribed_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_wait_is_unsubscribed() {
        let bus = MemoryBus::new();
        let (node, transport) = process(&bus);

        let subscription = node.listen("lock:users").await.unwrap();
        drop(subscription);
        settle().await;

        assert!(!transport.is_subscribed("lock:users"));
    }

    #[tokio::test]
    async fn test_channel_with_remaining_waiter_stays_subscribed() {
        let bus = MemoryBus::new();
        let (node, transport) = process(&bus);

        let first = node.listen("lock:users").await.unwrap();
        let _second = node.listen("lock:users").await.unwrap();
        drop(first);
        settle().await;

        assert!(transport.is_subscribed("lock:users"));
    }

    #[tokio::test]
    async fn test_relisten_after_idle_keeps_subscription() {
        let bus = MemoryBus::new();
        let (holder, _) = process(&bus);
        let (node, transport) = process(&bus);

        drop(node.listen("lock:users").await.unwrap());
        let mut again = node.listen("lock:users").await.unwrap();
        settle().await;

        assert!(transport.is_subscribed("lock:users"));
        holder.emit("lock:users", LockEvent::Unlocked).await.unwrap();
        assert_eq!(again.recv().await.unwrap(), LockEvent::Unlocked);
    }
}
