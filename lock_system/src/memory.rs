//! In-memory lock
//!
//! Single-node stand-in for [`Redlock`](crate::Redlock) with the same
//! contention semantics: a held, unexpired resource makes `acquire` fail
//! immediately with [`LockError::QuorumNotReached`].

use crate::errors::LockError;
use crate::lock::{DistributedLock, LockHandle};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Hold {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryLock {
    holds: Mutex<HashMap<String, Hold>>,
    infrastructure_failure: Mutex<Option<String>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every acquisition fail with an infrastructure error until cleared
    pub fn fail_with(&self, reason: Option<&str>) {
        let mut failure = self
            .infrastructure_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *failure = reason.map(str::to_string);
    }

    pub fn is_locked(&self, resource: &str) -> bool {
        let holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        holds
            .get(resource)
            .is_some_and(|hold| hold.expires_at > Instant::now())
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, resources: &[String], ttl: Duration) -> Result<LockHandle, LockError> {
        if ttl.is_zero() {
            return Err(LockError::InvalidTtl(0));
        }
        if let Some(reason) = self
            .infrastructure_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(LockError::Infrastructure(reason));
        }

        let now = Instant::now();
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        let contended = resources.iter().any(|resource| {
            holds
                .get(resource)
                .is_some_and(|hold| hold.expires_at > now)
        });
        if contended {
            return Err(LockError::QuorumNotReached { attempts: 1 });
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        let expires_at = now + ttl;
        for resource in resources {
            holds.insert(
                resource.clone(),
                Hold {
                    token: token.clone(),
                    expires_at,
                },
            );
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(LockHandle::new(resources.to_vec(), token, expires_at))
    }

    async fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        for resource in handle.resources() {
            if holds
                .get(resource)
                .is_some_and(|hold| hold.token == handle.token())
            {
                holds.remove(resource);
            }
        }
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
