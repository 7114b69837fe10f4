//! Store abstraction
//!
//! The coordinator only needs a handful of commands from the backing store:
//! plain reads, writes with and without expiry, and counters.

use crate::errors::CacheError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Key-value store shared by every process of the fleet
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    /// Read a raw string value
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a value without expiry
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Write a value that expires after `ttl` seconds
    async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> Result<(), CacheError>;

    /// Atomically increment a counter by one
    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.incr_by(key, 1).await
    }

    /// Atomically increment a counter by `delta`
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Round-trip the store to check connectivity
    async fn ping(&self) -> Result<String, CacheError>;

    /// Drop any open connection. Calling it twice is harmless.
    async fn close(&self) -> Result<(), CacheError>;
}

/// Read and deserialize a JSON value
pub async fn read_json<T>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, CacheError>
where
    T: for<'de> Deserialize<'de>,
{
    match store.get(key).await? {
        Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
        None => Ok(None),
    }
}

/// Serialize a value as JSON and write it with expiry
pub async fn write_json_ex<T>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: u64,
) -> Result<(), CacheError>
where
    T: Serialize + ?Sized + Sync,
{
    let json_str = serde_json::to_string(value)?;
    store.set_ex(key, &json_str, ttl).await
}
