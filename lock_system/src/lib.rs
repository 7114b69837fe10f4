//! Distributed lock layer for the stampede guard
//!
//! This crate provides the TTL-bounded mutual exclusion primitive used to
//! elect a single generator per key across the fleet: a quorum-based
//! Redlock over independent Redis nodes, and an in-memory lock.

pub mod errors;
pub mod lock;
pub mod memory;
pub mod prelude;
pub mod redlock;

pub use config::LockConfig;

pub use errors::{LockError, QUORUM_FAILURE_MESSAGE};
pub use lock::{DistributedLock, LockGuard, LockHandle};
pub use memory::MemoryLock;
pub use redlock::Redlock;
