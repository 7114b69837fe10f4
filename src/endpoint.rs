//! Per-endpoint configuration
//!
//! Each cached endpoint registers its TTL, key prefix, generator and the
//! function deriving the request hash.

use crate::errors::StampedeError;
use crate::handler::Request;
use crate::hash::request_hash;
use config::ConfigError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Expensive operation whose result is cached
pub type Generator = Arc<dyn Fn(Request) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Derives the request hash used in every key for a request
pub type CacheKeyHandle =
    Arc<dyn Fn(Request) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

#[derive(Clone)]
pub struct EndpointConfig {
    /// Lifetime of a cached response, in seconds
    pub ttl: u64,
    /// Endpoint segment of every key
    pub prefix: String,
    pub callback: Generator,
    pub cache_key_handle: CacheKeyHandle,
    /// Declared for callers that set it. Expiry is always TTL-based.
    pub expire_cache: Option<bool>,
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("ttl", &self.ttl)
            .field("prefix", &self.prefix)
            .field("expire_cache", &self.expire_cache)
            .finish()
    }
}

impl EndpointConfig {
    pub fn new<C, CF, K, KF>(prefix: &str, ttl: u64, callback: C, cache_key_handle: K) -> Self
    where
        C: Fn(Request) -> CF + Send + Sync + 'static,
        CF: Future<Output = anyhow::Result<Value>> + Send + 'static,
        K: Fn(Request) -> KF + Send + Sync + 'static,
        KF: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            ttl,
            prefix: prefix.to_string(),
            callback: Arc::new(move |request| -> BoxFuture<'static, anyhow::Result<Value>> {
                Box::pin(callback(request))
            }),
            cache_key_handle: Arc::new(
                move |request| -> BoxFuture<'static, anyhow::Result<String>> {
                    Box::pin(cache_key_handle(request))
                },
            ),
            expire_cache: None,
        }
    }

    /// Endpoint keyed by [`request_hash`] of the URL and body
    pub fn with_default_key<C, CF>(prefix: &str, ttl: u64, callback: C) -> Self
    where
        C: Fn(Request) -> CF + Send + Sync + 'static,
        CF: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(prefix, ttl, callback, |request: Request| async move {
            Ok::<_, anyhow::Error>(request_hash(&request))
        })
    }

    pub fn with_expire_cache(mut self, expire_cache: bool) -> Self {
        self.expire_cache = Some(expire_cache);
        self
    }

    pub fn validate(&self) -> Result<(), StampedeError> {
        if self.ttl == 0 {
            return Err(ConfigError::Invalid(format!(
                "Endpoint {} ttl must be greater than 0",
                self.prefix
            ))
            .into());
        }
        if self.prefix.is_empty() {
            return Err(ConfigError::Invalid("Endpoint prefix cannot be empty".to_string()).into());
        }
        Ok(())
    }
}
