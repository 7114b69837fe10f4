//! In-memory store
//!
//! A process-local [`KeyValueStore`] with TTL support. Sharing one instance
//! between several coordinators behaves like several processes sharing one
//! Redis, which is what the coordinator tests rely on.

use crate::errors::CacheError;
use crate::store::KeyValueStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent command fail as if the store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("store unavailable".into()));
        }
        Ok(())
    }

    fn insert(&self, key: &str, value: &str, expires_at: Option<Instant>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.check()?;
        self.insert(key, value, None);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> Result<(), CacheError> {
        self.check()?;
        if ttl == 0 {
            return Err(CacheError::InvalidTtl(ttl));
        }
        self.insert(key, value, Some(Instant::now() + Duration::from_secs(ttl)));
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_expired(now) {
                    entry.value = "0".to_string();
                    entry.expires_at = None;
                }
            })
            .or_insert_with(|| Entry {
                value: "0".to_string(),
                expires_at: None,
            });

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::NotAnInteger(key.to_string()))?;
        let next = current + delta;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn ping(&self) -> Result<String, CacheError> {
        self.check()?;
        Ok("PONG".to_string())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
