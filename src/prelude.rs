//! Convenience re-exports for common stampede-guard usage
//!
//! # Example
//!
//! ```rust
//! use stampede_guard::prelude::*;
//! ```

// Core components
pub use crate::coordinator::Coordinator;
pub use crate::endpoint::{CacheKeyHandle, EndpointConfig, Generator};
pub use crate::errors::StampedeError;
pub use crate::handler::{FailureResponse, Handler, HandlerOutcome, Request, Response};
pub use crate::hash::request_hash;
pub use crate::logging::init_logging;
pub use crate::settings::ProcessSettings;

// Re-export centralized config
pub use config::{AppConfig, CoordinatorConfig, LockConfig, RedisConfig};

// Backends
pub use cache_system::prelude::{CacheManager, KeyValueStore, MemoryStore};
pub use lock_system::prelude::{DistributedLock, MemoryLock, Redlock};
pub use signal_system::prelude::{MemoryBus, RedisPubSub, SignalManager, WaitRegistry};

// Common external dependencies
pub use anyhow;
pub use async_trait::async_trait;
pub use tokio;
