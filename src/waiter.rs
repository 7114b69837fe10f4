//! Waiting out another process's generation
//!
//! A caller that lost the lock race listens on the key's event channel and
//! races the first event against a poll timer. Whichever fires first decides
//! the outcome:
//!
//! - `"unlocked"` → read the freshly written value from the cache
//! - any other event → fail
//! - timer → read the cache directly; fail with a poll timeout if still empty
//!
//! The timer path means a lost pub/sub message costs at most one poll window
//! of latency, never a stuck waiter. A subscription that cannot be made at
//! all (the subscriber connection is reconnecting) leaves only the timer.

use crate::errors::StampedeError;
use crate::keys::RequestKeys;
use crate::response_cache::ResponseCache;
use crate::stats::UsageStats;
use serde_json::Value;
use signal_system::{LockEvent, SignalError, SignalManager};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UnlockWaiter {
    cache: ResponseCache,
    signals: SignalManager,
    stats: UsageStats,
}

impl UnlockWaiter {
    pub fn new(cache: ResponseCache, signals: SignalManager, stats: UsageStats) -> Self {
        Self {
            cache,
            signals,
            stats,
        }
    }

    /// Resolve the value another process is generating for `keys`
    ///
    /// `lock_error` is why the lock could not be taken. Only contention is
    /// worth waiting for; anything else is announced on the channel, so other
    /// waiters abort too, and returned as is.
    pub async fn await_unlock(
        &self,
        keys: &RequestKeys,
        lock_error: StampedeError,
        timeout: Duration,
    ) -> Result<Value, StampedeError> {
        if !lock_error.is_contention() {
            tracing::error!(
                error.kind = lock_error.kind(),
                error = %lock_error,
                channel = %keys.event_channel,
                "lock acquisition failed, aborting waiters"
            );
            if let Err(e) = self.signals.emit(&keys.event_channel, LockEvent::Error).await {
                tracing::warn!(channel = %keys.event_channel, error = %e, "failed to publish lock error");
            }
            return Err(lock_error);
        }

        self.stats.record_listener(&keys.cache_key);

        debug_log!(channel = %keys.event_channel, "waiting for unlock");
        let mut subscription = match self.signals.listen(&keys.event_channel).await {
            Ok(subscription) => Some(subscription),
            Err(SignalError::ShutDown) => return Err(SignalError::ShutDown.into()),
            Err(e) => {
                tracing::warn!(
                    channel = %keys.event_channel,
                    error = %e,
                    "subscribe failed, polling the cache instead"
                );
                None
            }
        };

        // The holder may have finished between our cache miss and the subscription
        if let Some(value) = self.cache.read(&keys.cache_key).await? {
            debug_log!(cache_key = %keys.cache_key, "value landed before subscription");
            return Ok(value);
        }

        let event = match subscription.as_mut() {
            Some(subscription) => tokio::select! {
                event = subscription.recv() => Some(event?),
                _ = tokio::time::sleep(timeout) => None,
            },
            None => {
                tokio::time::sleep(timeout).await;
                None
            }
        };

        match event {
            Some(LockEvent::Unlocked) => {
                self.stats.record_success_listen(&keys.cache_key);
                let value = self.cache.read(&keys.cache_key).await?;
                if value.is_none() {
                    tracing::warn!(
                        cache_key = %keys.cache_key,
                        "unlock event arrived but cache is empty"
                    );
                }
                Ok(value.unwrap_or(Value::Null))
            }
            Some(other) => {
                tracing::error!(channel = %keys.event_channel, event = %other, "lock holder failed");
                Err(StampedeError::LockHolderFailed {
                    channel: keys.event_channel.clone(),
                    event: other.to_string(),
                })
            }
            None => match self.cache.read(&keys.cache_key).await? {
                Some(value) => {
                    debug_log!(cache_key = %keys.cache_key, "served from cache after poll timeout");
                    Ok(value)
                }
                None => Err(StampedeError::EventPollTimeout {
                    channel: keys.event_channel.clone(),
                    waited_ms: timeout.as_millis() as u64,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_system::{KeyValueStore, MemoryStore};
    use lock_system::LockError;
    use serde_json::json;
    use signal_system::{MemoryBus, PubSubTransport, WaitRegistry};
    use std::sync::Arc;

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: Arc<MemoryBus>,
        waiter: UnlockWaiter,
        holder: SignalManager,
        keys: RequestKeys,
    }

    fn signals(bus: &Arc<MemoryBus>) -> SignalManager {
        let registry = WaitRegistry::new();
        let transport: Arc<dyn PubSubTransport> = Arc::new(bus.attach(&registry));
        SignalManager::new(registry, transport)
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let bus = MemoryBus::new();
        let waiter = UnlockWaiter::new(
            ResponseCache::new(store.clone()),
            signals(&bus),
            UsageStats::new(store.clone(), "p"),
        );
        Fixture {
            store,
            holder: signals(&bus),
            bus,
            waiter,
            keys: RequestKeys::new("p", "/users/1", "h"),
        }
    }

    fn contention() -> StampedeError {
        LockError::QuorumNotReached { attempts: 1 }.into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_event_serves_cached_value() {
        let f = fixture();
        let value = json!({"status": 200, "message": "success"});

        let holder = f.holder.clone();
        let store = f.store.clone();
        let keys = f.keys.clone();
        let written = value.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            store
                .set_ex(&keys.cache_key, &written.to_string(), 10)
                .await
                .unwrap();
            holder.emit(&keys.event_channel, LockEvent::Unlocked).await.unwrap();
        });

        let started = tokio::time::Instant::now();
        let result = f
            .waiter
            .await_unlock(&f.keys, contention(), Duration::from_secs(4))
            .await
            .unwrap();

        assert_eq!(result, value);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_fails_waiter() {
        let f = fixture();

        let holder = f.holder.clone();
        let channel = f.keys.event_channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            holder.emit(&channel, LockEvent::Error).await.unwrap();
        });

        let err = f
            .waiter
            .await_unlock(&f.keys, contention(), Duration::from_secs(4))
            .await
            .unwrap_err();
        assert!(matches!(err, StampedeError::LockHolderFailed { ref event, .. } if event == "error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_event_falls_back_to_cache_poll() {
        let f = fixture();
        f.bus.set_drop_messages(true);
        let value = json!({"id": 1});

        let holder = f.holder.clone();
        let store = f.store.clone();
        let keys = f.keys.clone();
        let written = value.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            store
                .set_ex(&keys.cache_key, &written.to_string(), 10)
                .await
                .unwrap();
            holder.emit(&keys.event_channel, LockEvent::Unlocked).await.unwrap();
        });

        let started = tokio::time::Instant::now();
        let result = f
            .waiter
            .await_unlock(&f.keys, contention(), Duration::from_secs(4))
            .await
            .unwrap();

        assert_eq!(result, value);
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscribe_falls_back_to_polling() {
        let f = fixture();
        f.bus.set_refuse_subscriptions(true);
        let value = json!({"id": 2});

        let store = f.store.clone();
        let keys = f.keys.clone();
        let written = value.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            store
                .set_ex(&keys.cache_key, &written.to_string(), 10)
                .await
                .unwrap();
        });

        let started = tokio::time::Instant::now();
        let result = f
            .waiter
            .await_unlock(&f.keys, contention(), Duration::from_secs(4))
            .await
            .unwrap();

        assert_eq!(result, value);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(f.waiter.signals.registry().waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_with_empty_cache() {
        let f = fixture();

        let err = f
            .waiter
            .await_unlock(&f.keys, contention(), Duration::from_millis(4000))
            .await
            .unwrap_err();

        assert!(matches!(err, StampedeError::EventPollTimeout { waited_ms: 4000, .. }));
        assert_eq!(err.kind(), "poll_timeout");
        // The abandoned subscription is gone from the registry
        assert_eq!(f.waiter.signals.registry().waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infrastructure_error_is_announced() {
        let f = fixture();
        let broken: StampedeError = LockError::Infrastructure("no route to host".into()).into();

        let err = f
            .waiter
            .await_unlock(&f.keys, broken, Duration::from_secs(4))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "lock_infrastructure");
        assert_eq!(
            f.bus.published(),
            vec![(f.keys.event_channel.clone(), "error".to_string())]
        );
        // No wait was registered
        assert_eq!(f.waiter.signals.registry().waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_already_cached_after_subscribe() {
        let f = fixture();
        f.store
            .set_ex(&f.keys.cache_key, r#"{"early":true}"#, 10)
            .await
            .unwrap();

        let result = f
            .waiter
            .await_unlock(&f.keys, contention(), Duration::from_secs(4))
            .await
            .unwrap();
        assert_eq!(result, json!({"early": true}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_is_counted() {
        let f = fixture();
        let stats = UsageStats::new(f.store.clone(), "p");

        let holder = f.holder.clone();
        let store = f.store.clone();
        let keys = f.keys.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store.set_ex(&keys.cache_key, "1", 10).await.unwrap();
            holder.emit(&keys.event_channel, LockEvent::Unlocked).await.unwrap();
        });

        f.waiter
            .await_unlock(&f.keys, contention(), Duration::from_secs(4))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let listeners = stats.stat_key(crate::stats::LISTENERS_COUNT, &f.keys.cache_key);
        let successes = stats.stat_key(crate::stats::SUCCESS_LISTENS_COUNT, &f.keys.cache_key);
        assert_eq!(f.store.get(&listeners).await.unwrap().as_deref(), Some("1"));
        assert_eq!(f.store.get(&successes).await.unwrap().as_deref(), Some("1"));
    }
}
