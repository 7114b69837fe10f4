//! Cached response reads and writes

use crate::errors::StampedeError;
use cache_system::{read_json, write_json_ex, KeyValueStore};
use serde_json::Value;
use std::sync::Arc;

/// JSON view over the store for cached generator output
#[derive(Debug, Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Cached value, if any. A stored JSON `null` counts as a miss.
    pub async fn read(&self, cache_key: &str) -> Result<Option<Value>, StampedeError> {
        let value: Option<Value> = read_json(self.store.as_ref(), cache_key).await?;
        Ok(value.filter(|value| !value.is_null()))
    }

    pub async fn write(&self, cache_key: &str, value: &Value, ttl: u64) -> Result<(), StampedeError> {
        write_json_ex(self.store.as_ref(), cache_key, value, ttl).await?;
        Ok(())
    }
}
