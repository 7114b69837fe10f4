//! Convenience re-exports for common cache-system usage

// Core cache system components
pub use crate::errors::CacheError;
pub use crate::manager::CacheManager;
pub use crate::memory::MemoryStore;
pub use crate::store::{read_json, write_json_ex, KeyValueStore};

// Re-export centralized config
pub use config::RedisConfig;

// Common external dependencies
pub use async_trait::async_trait;
pub use redis;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
