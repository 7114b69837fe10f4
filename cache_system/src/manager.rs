//! Cache manager implementation
//!
//! This module provides the Redis-backed [`KeyValueStore`]
//! with lazy connection management.

use crate::errors::{is_connection_lost, CacheError};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use config::RedisConfig;
use redis::{AsyncCommands, Client};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Redis-based cache manager
#[derive(Clone)]
pub struct CacheManager {
    client: Arc<Client>,
    config: Arc<RedisConfig>,
    connection_pool: Arc<RwLock<Option<redis::aio::MultiplexedConnection>>>,
}

impl Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connection_status = {
            match self.connection_pool.try_read() {
                Ok(pool) => {
                    if pool.is_some() {
                        "connected"
                    } else {
                        "no_connection"
                    }
                }
                Err(_) => "lock_error",
            }
        };

        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("connected", &connection_status)
            .finish()
    }
}

impl CacheManager {
    /// Create a new cache manager. No connection is opened until first use.
    pub fn new(config: RedisConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client: Arc::new(client),
            config: Arc::new(config),
            connection_pool: Arc::new(RwLock::new(None)),
        })
    }

    /// Get or create Redis connection
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        let mut pool = self.connection_pool.write().await;

        if pool.is_none() {
            let connection = tokio::time::timeout(
                self.config.connection_timeout(),
                self.client.get_multiplexed_async_connection(),
            )
            .await
            .map_err(|_| CacheError::Timeout)??;
            *pool = Some(connection);
        }

        Ok(pool
            .as_ref()
            .ok_or_else(|| CacheError::Connection("Failed to get connection from pool".into()))?
            .clone())
    }

    /// Run one command, forgetting the connection if Redis dropped it
    ///
    /// The next command then opens a fresh connection, so a Redis restart
    /// costs the commands in flight and nothing after them.
    async fn run<T, F, Fut>(&self, command: F) -> Result<T, CacheError>
    where
        F: FnOnce(redis::aio::MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.get_connection().await?;
        match command(conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if is_connection_lost(&e) {
                    self.reset_connection().await;
                }
                Err(e.into())
            }
        }
    }

    async fn reset_connection(&self) {
        let mut pool = self.connection_pool.write().await;
        if pool.take().is_some() {
            tracing::warn!(url = %self.config.url, "redis store connection lost, reconnecting on next command");
        }
    }

    /// Whether a connection is currently cached
    pub async fn is_connected(&self) -> bool {
        self.connection_pool.read().await.is_some()
    }

    /// Get current configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

#[async_trait]
impl KeyValueStore for CacheManager {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.run(|mut conn| async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.run(|mut conn| async move { conn.set::<_, _, ()>(key, value).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> Result<(), CacheError> {
        if ttl == 0 {
            return Err(CacheError::InvalidTtl(ttl));
        }
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(key, value, ttl).await })
            .await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.run(|mut conn| async move { conn.incr::<_, _, i64>(key, delta).await })
            .await
    }

    async fn ping(&self) -> Result<String, CacheError> {
        self.run(|mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
    }

    async fn close(&self) -> Result<(), CacheError> {
        // Multiplexed connections close once the last clone is dropped
        let mut pool = self.connection_pool.write().await;
        if pool.take().is_some() {
            tracing::debug!(url = %self.config.url, "closed redis store connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_does_not_connect() {
        let manager = CacheManager::new(RedisConfig::new("redis://127.0.0.1:1".into())).unwrap();
        assert!(format!("{:?}", manager).contains("no_connection"));
        assert_eq!(manager.config().url, "redis://127.0.0.1:1");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = CacheManager::new(RedisConfig::new("not a url".into()));
        assert!(matches!(result, Err(CacheError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected_before_connecting() {
        let manager = CacheManager::new(RedisConfig::new("redis://127.0.0.1:1".into())).unwrap();
        let result = manager.set_ex("key", "value", 0).await;
        assert!(matches!(result, Err(CacheError::InvalidTtl(0))));
    }

    #[test]
    fn test_encoded_password_round_trips() {
        let config = RedisConfig::from_parts("cache.internal", 6379, Some("p@ss/word#?"));
        let manager = CacheManager::new(config).unwrap();

        let info = manager.client.get_connection_info();
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/word#?"));
        assert_eq!(
            info.addr,
            redis::ConnectionAddr::Tcp("cache.internal".to_string(), 6379)
        );
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_cached_connection() {
        let manager = CacheManager::new(RedisConfig::new("redis://127.0.0.1:1".into())).unwrap();
        assert!(manager.get("key").await.is_err());
        assert!(!manager.is_connected().await);
        // Every command retries the connection instead of reusing a dead one
        assert!(manager.ping().await.is_err());
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let manager = CacheManager::new(RedisConfig::new("redis://127.0.0.1:1".into())).unwrap();
        manager.close().await.unwrap();
        manager.close().await.unwrap();
    }
}
