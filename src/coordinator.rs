//! Cache stampede coordinator
//!
//! Per request:
//!
//! 1. hash the request and derive its keys
//! 2. serve from cache when present (no lock, no stats)
//! 3. otherwise try the generation lock
//!    - held: run the generator with retries, record usage, cache the
//!      result, release the lock, then publish `"unlocked"` or `"error"`
//!    - contended: wait for the holder through [`UnlockWaiter`]

use crate::endpoint::EndpointConfig;
use crate::errors::StampedeError;
use crate::executor::CallbackExecutor;
use crate::handler::{Handler, Request};
use crate::keys::RequestKeys;
use crate::response_cache::ResponseCache;
use crate::settings::ProcessSettings;
use crate::stats::UsageStats;
use crate::waiter::UnlockWaiter;
use lock_system::LockGuard;
use serde_json::Value;
use signal_system::LockEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fleet-wide single-flight cache in front of expensive generators
#[derive(Clone, Debug)]
pub struct Coordinator {
    settings: Arc<ProcessSettings>,
    cache: ResponseCache,
    stats: UsageStats,
    executor: CallbackExecutor,
    waiter: UnlockWaiter,
    shut_down: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(settings: ProcessSettings) -> Self {
        let cache = ResponseCache::new(settings.store().clone());
        let stats = UsageStats::new(settings.store().clone(), settings.key_prefix());
        let executor = CallbackExecutor::new(
            settings.callback_retry_count(),
            settings.callback_retry_interval(),
        );
        let waiter = UnlockWaiter::new(cache.clone(), settings.signals().clone(), stats.clone());

        Self {
            settings: Arc::new(settings),
            cache,
            stats,
            executor,
            waiter,
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    /// Bind an endpoint and get its request handler
    pub fn control(&self, endpoint: EndpointConfig) -> Result<Handler, StampedeError> {
        endpoint.validate()?;
        Ok(Handler::new(self.clone(), endpoint))
    }

    /// Resolve the value for `request`, generating it at most once across the fleet
    pub async fn resolve(&self, endpoint: &EndpointConfig, request: &Request) -> Result<Value, StampedeError> {
        if self.is_shut_down() {
            return Err(StampedeError::ShutDown);
        }

        let request_hash = (endpoint.cache_key_handle)(request.clone())
            .await
            .map_err(StampedeError::KeyGeneration)?;
        let keys = RequestKeys::new(self.settings.key_prefix(), &endpoint.prefix, &request_hash);

        if let Some(value) = self.cache.read(&keys.cache_key).await? {
            if self.settings.debug() {
                tracing::debug!(cache_key = %keys.cache_key, "served from cache");
            }
            return Ok(value);
        }

        let lock = self.settings.lock();
        match lock
            .acquire(&[keys.lock_key.clone()], self.settings.lock_ttl())
            .await
        {
            Ok(handle) => {
                let guard = LockGuard::new(lock.clone(), handle);
                self.generate(endpoint, request, &keys, guard).await
            }
            Err(lock_error) => {
                if self.settings.debug() {
                    tracing::debug!(lock_key = %keys.lock_key, error = %lock_error, "lock not acquired");
                }
                self.waiter
                    .await_unlock(&keys, lock_error.into(), self.settings.poll_timeout())
                    .await
            }
        }
    }

    /// Generate under the lock, release it, then tell waiters how it went
    async fn generate(
        &self,
        endpoint: &EndpointConfig,
        request: &Request,
        keys: &RequestKeys,
        guard: LockGuard,
    ) -> Result<Value, StampedeError> {
        let outcome = self.generate_and_store(endpoint, request, keys).await;

        // Release before publishing so woken waiters never see a held lock
        if let Err(e) = guard.release().await {
            tracing::warn!(lock_key = %keys.lock_key, error = %e, "lock release failed, leaving it to expire");
        }

        let event = match &outcome {
            Ok(_) => LockEvent::Unlocked,
            Err(e) => {
                tracing::error!(
                    error.kind = e.kind(),
                    error = %e,
                    cache_key = %keys.cache_key,
                    body = %request.body_snapshot(),
                    "locked generation failed"
                );
                LockEvent::Error
            }
        };

        if let Err(e) = self.settings.signals().emit(&keys.event_channel, event).await {
            tracing::warn!(channel = %keys.event_channel, error = %e, "failed to publish lock event");
        }

        debug_log!(cache_key = %keys.cache_key, ok = outcome.is_ok(), "generation finished");
        outcome
    }

    async fn generate_and_store(
        &self,
        endpoint: &EndpointConfig,
        request: &Request,
        keys: &RequestKeys,
    ) -> Result<Value, StampedeError> {
        let execution = self.executor.execute(&endpoint.callback, request).await?;

        self.stats.record_usage(
            &keys.namespace,
            execution.retry_attempts,
            request.body_snapshot(),
        );

        self.cache
            .write(&keys.cache_key, &execution.result, endpoint.ttl)
            .await?;
        Ok(execution.result)
    }

    /// Round-trip the store
    pub async fn ping(&self) -> Result<String, StampedeError> {
        Ok(self.settings.store().ping().await?)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Close pub/sub, lock and store connections and detach pending waiters
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) -> Result<(), StampedeError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let signals = self.settings.signals().shutdown().await;
        let lock = self.settings.lock().close().await;
        let store = self.settings.store().close().await;

        tracing::info!("stampede guard shut down");
        signals?;
        lock?;
        store?;
        Ok(())
    }
}
