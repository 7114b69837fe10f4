//! Process-wide settings
//!
//! Built once at startup with every default resolved, then shared read-only
//! by all handlers.

use crate::errors::StampedeError;
use cache_system::{CacheManager, KeyValueStore};
use config::{AppConfig, CoordinatorConfig};
use lock_system::{DistributedLock, Redlock};
use signal_system::{PubSubTransport, RedisPubSub, SignalManager, WaitRegistry};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ProcessSettings {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<dyn DistributedLock>,
    signals: SignalManager,
    callback_retry_count: u32,
    callback_retry_interval: Duration,
    key_prefix: String,
    debug: bool,
    lock_ttl: Duration,
    poll_timeout: Duration,
}

impl std::fmt::Debug for ProcessSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSettings")
            .field("store", &self.store)
            .field("lock", &self.lock)
            .field("signals", &self.signals)
            .field("callback_retry_count", &self.callback_retry_count)
            .field("callback_retry_interval", &self.callback_retry_interval)
            .field("key_prefix", &self.key_prefix)
            .field("debug", &self.debug)
            .field("lock_ttl", &self.lock_ttl)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl ProcessSettings {
    /// Assemble settings from already-built backends
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        lock: Arc<dyn DistributedLock>,
        signals: SignalManager,
        config: &CoordinatorConfig,
    ) -> Result<Self, StampedeError> {
        config.validate()?;

        Ok(Self {
            store,
            lock,
            signals,
            callback_retry_count: config.callback_retry_count,
            callback_retry_interval: config.retry_interval(),
            key_prefix: config.key_prefix.clone(),
            debug: config.debug,
            lock_ttl: config.lock_ttl(),
            poll_timeout: config.poll_timeout(),
        })
    }

    /// Open the Redis store, lock nodes and pub/sub connections described by `config`
    pub async fn connect(config: &AppConfig) -> Result<Self, StampedeError> {
        config.validate()?;

        let store: Arc<dyn KeyValueStore> = Arc::new(CacheManager::new(config.redis.clone())?);
        let lock: Arc<dyn DistributedLock> =
            Arc::new(Redlock::new(&config.lock_nodes(), config.lock.clone())?);

        let registry = WaitRegistry::new();
        let transport: Arc<dyn PubSubTransport> =
            Arc::new(RedisPubSub::connect(&config.redis.url, registry.clone()).await?);
        let signals = SignalManager::new(registry, transport);

        tracing::info!(
            redis = %config.redis.url,
            lock_nodes = config.lock_nodes().len(),
            key_prefix = %config.coordinator.key_prefix,
            "stampede guard connected"
        );

        Self::new(store, lock, signals, &config.coordinator)
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn lock(&self) -> &Arc<dyn DistributedLock> {
        &self.lock
    }

    pub fn signals(&self) -> &SignalManager {
        &self.signals
    }

    pub fn callback_retry_count(&self) -> u32 {
        self.callback_retry_count
    }

    pub fn callback_retry_interval(&self) -> Duration {
        self.callback_retry_interval
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_system::MemoryStore;
    use lock_system::MemoryLock;
    use signal_system::MemoryBus;

    fn signals() -> SignalManager {
        let registry = WaitRegistry::new();
        let transport: Arc<dyn PubSubTransport> = Arc::new(MemoryBus::new().attach(&registry));
        SignalManager::new(registry, transport)
    }

    #[test]
    fn test_defaults_are_resolved() {
        let settings = ProcessSettings::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLock::new()),
            signals(),
            &CoordinatorConfig::default(),
        )
        .unwrap();

        assert_eq!(settings.callback_retry_count(), 4);
        assert_eq!(settings.callback_retry_interval(), Duration::from_millis(200));
        assert_eq!(settings.key_prefix(), "tmc-apig-cache");
        assert!(!settings.debug());
        assert_eq!(settings.lock_ttl(), Duration::from_secs(10));
        assert_eq!(settings.poll_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ProcessSettings::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLock::new()),
            signals(),
            &CoordinatorConfig::default().with_retry_policy(0, 200),
        );
        assert!(matches!(result, Err(StampedeError::Config(_))));
    }
}
