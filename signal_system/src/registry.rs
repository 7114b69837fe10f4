//! Per-channel wait registry
//!
//! Every waiter registers its own one-shot slot under a channel name before
//! the channel is subscribed. The first message dispatched on that channel
//! fires and removes all slots registered at that moment; later messages
//! only reach waiters that registered afterwards. Dropping a
//! [`Subscription`] removes its slot, so abandoned waits never pile up.
//!
//! Whenever a channel loses its last slot, its name is sent to the idle
//! watcher (see [`WaitRegistry::watch_idle`]) so the transport subscription
//! can be released too.

use crate::errors::SignalError;
use crate::event::LockEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};

type Slots = HashMap<u64, oneshot::Sender<LockEvent>>;

#[derive(Debug, Default)]
pub struct WaitRegistry {
    waiters: Mutex<HashMap<String, Slots>>,
    next_id: AtomicU64,
    idle: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl WaitRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a one-shot wait on `channel`
    pub fn register(self: &Arc<Self>, channel: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();

        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters
            .entry(channel.to_string())
            .or_default()
            .insert(id, sender);

        Subscription {
            channel: channel.to_string(),
            id,
            receiver,
            registry: Arc::downgrade(self),
        }
    }

    /// Deliver a raw payload to every waiter on `channel`. Returns how many were woken.
    pub fn dispatch(&self, channel: &str, payload: &str) -> usize {
        let slots = {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            waiters.remove(channel)
        };

        let Some(slots) = slots else {
            debug_log!(channel, "no local waiters for lock event");
            return 0;
        };
        self.notify_idle(channel);

        let event = LockEvent::parse(payload);
        debug_log!(channel, event = %event, waiters = slots.len(), "dispatching lock event");

        slots
            .into_values()
            .filter(|sender| !sender.is_closed())
            .map(|sender| sender.send(event.clone()))
            .filter(Result::is_ok)
            .count()
    }

    /// Receive the name of every channel whose last slot went away
    ///
    /// Only the most recent watcher is notified.
    pub fn watch_idle(&self) -> mpsc::UnboundedReceiver<String> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.idle.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);
        receiver
    }

    /// Whether anyone is still waiting on `channel`
    pub fn has_waiters(&self, channel: &str) -> bool {
        let waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters.contains_key(channel)
    }

    /// Drop every pending slot. Waiters observe [`SignalError::Detached`].
    pub fn clear(&self) {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters.clear();
    }

    /// Number of pending waits across all channels
    pub fn waiter_count(&self) -> usize {
        let waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters.values().map(HashMap::len).sum()
    }

    /// Number of channels with at least one pending wait
    pub fn channel_count(&self) -> usize {
        let waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters.len()
    }

    fn deregister(&self, channel: &str, id: u64) {
        let emptied = {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            let emptied = waiters.get_mut(channel).is_some_and(|slots| {
                slots.remove(&id);
                slots.is_empty()
            });
            if emptied {
                waiters.remove(channel);
            }
            emptied
        };
        if emptied {
            self.notify_idle(channel);
        }
    }

    fn notify_idle(&self, channel: &str) {
        let idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = idle.as_ref() {
            let _ = sender.send(channel.to_string());
        }
    }
}

/// A pending one-shot wait for the next event on a channel
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    id: u64,
    receiver: oneshot::Receiver<LockEvent>,
    registry: Weak<WaitRegistry>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the first event on the channel
    pub async fn recv(&mut self) -> Result<LockEvent, SignalError> {
        (&mut self.receiver)
            .await
            .map_err(|_| SignalError::Detached(self.channel.clone()))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(&self.channel, self.id);
        }
    }
}
