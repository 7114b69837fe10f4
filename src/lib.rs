//! # stampede-guard
//!
//! Distributed cache-stampede prevention. For every keyed, expensive
//! generator call, at most one process in the fleet runs the generator at a
//! time; every other concurrent caller either reads the cached result or
//! waits for the in-flight run and then reads its result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stampede_guard::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     init_logging(config.coordinator.debug);
//!
//!     let settings = ProcessSettings::connect(&config).await?;
//!     let coordinator = Coordinator::new(settings);
//!
//!     let handler = coordinator.control(EndpointConfig::with_default_key(
//!         "/users",
//!         10,
//!         |request: Request| async move {
//!             // call the upstream API here
//!             Ok::<_, anyhow::Error>(json!({ "status": 200, "url": request.original_url }))
//!         },
//!     ))?;
//!
//!     let request = Request::new("/users/1", json!({}));
//!     let mut response = Response::new();
//!     let outcome = handler.handle(&request, &mut response, |res| res.data.clone()).await;
//!     println!("{:?}", outcome);
//!
//!     coordinator.shutdown().await?;
//!     Ok(())
//! }
//! ```

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

pub mod coordinator;
pub mod endpoint;
pub mod errors;
pub mod executor;
pub mod handler;
pub mod hash;
pub mod keys;
pub mod logging;
pub mod prelude;
pub mod response_cache;
pub mod settings;
pub mod stats;
pub mod waiter;

// Re-export the main public types for convenience
pub use coordinator::Coordinator;
pub use endpoint::{CacheKeyHandle, EndpointConfig, Generator};
pub use errors::StampedeError;
pub use handler::{FailureResponse, Handler, HandlerOutcome, Request, Response};
pub use settings::ProcessSettings;

// Re-export centralized config
pub use config::{AppConfig, CoordinatorConfig, LockConfig, RedisConfig};

// Re-export internal crates used in the public API
pub use cache_system;
pub use lock_system;
pub use signal_system;
