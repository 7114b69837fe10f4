//! Lock abstraction

use crate::errors::LockError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Proof of a held lock. Hand it back to [`DistributedLock::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    resources: Vec<String>,
    token: String,
    valid_until: Instant,
}

impl LockHandle {
    pub fn new(resources: Vec<String>, token: String, valid_until: Instant) -> Self {
        Self {
            resources,
            token,
            valid_until,
        }
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Random value identifying this holder
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn valid_until(&self) -> Instant {
        self.valid_until
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.valid_until
    }
}

/// TTL-bounded, fleet-wide mutual exclusion
#[async_trait]
pub trait DistributedLock: Send + Sync + Debug {
    /// Acquire every resource at once, or fail without waiting for the holder
    async fn acquire(&self, resources: &[String], ttl: Duration) -> Result<LockHandle, LockError>;

    /// Release a handle. Releasing an expired handle is not an error.
    async fn release(&self, handle: LockHandle) -> Result<(), LockError>;

    /// Drop open connections
    async fn close(&self) -> Result<(), LockError> {
        Ok(())
    }
}

/// Scoped ownership of a [`LockHandle`]
///
/// Call [`LockGuard::release`] on the normal path. If the guard is dropped
/// while still holding the handle (a panic, or the owning future being
/// cancelled), release is spawned onto the current runtime instead.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    handle: Option<LockHandle>,
}

impl LockGuard {
    pub fn new(lock: Arc<dyn DistributedLock>, handle: LockHandle) -> Self {
        Self {
            lock,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        match self.handle.take() {
            Some(handle) => self.lock.release(handle).await,
            None => Ok(()),
        }
    }
}

impl Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let lock = self.lock.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = lock.release(handle).await {
                        tracing::warn!(error = %e, "deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    resources = ?handle.resources(),
                    "lock guard dropped outside a runtime, lock left to expire"
                );
            }
        }
    }
}
