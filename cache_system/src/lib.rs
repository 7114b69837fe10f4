//! Key-value store layer for the stampede guard
//!
//! This crate provides the store abstraction used for cached responses
//! and usage counters, with a Redis implementation and an in-memory one.

pub mod errors;
pub mod manager;
pub mod memory;
pub mod prelude;
pub mod store;

// Re-export centralized config
pub use config::RedisConfig;

pub use errors::CacheError;
pub use manager::CacheManager;
pub use memory::MemoryStore;
pub use store::{read_json, write_json_ex, KeyValueStore};
