//! Convenience re-exports for common lock-system usage

pub use crate::errors::{LockError, QUORUM_FAILURE_MESSAGE};
pub use crate::lock::{DistributedLock, LockGuard, LockHandle};
pub use crate::memory::MemoryLock;
pub use crate::redlock::Redlock;

pub use config::LockConfig;

pub use async_trait::async_trait;
