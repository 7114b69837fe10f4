//! Redlock over independent Redis nodes
//!
//! A lock is held when a majority of nodes accepted the token and enough of
//! the TTL is left after subtracting the time spent voting and the clock
//! drift allowance. Losing the vote releases any partial holds and, if
//! configured, retries after a jittered delay.

use crate::errors::{is_connection_lost, LockError};
use crate::lock::{DistributedLock, LockHandle};
use async_trait::async_trait;
use config::LockConfig;
use futures::future::join_all;
use rand::Rng;
use redis::{Client, Script};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

const ACQUIRE_SCRIPT: &str = r#"
for _, key in ipairs(KEYS) do
  if redis.call("exists", key) == 1 then
    return 0
  end
end
for _, key in ipairs(KEYS) do
  redis.call("set", key, ARGV[1], "PX", ARGV[2])
end
return #KEYS
"#;

const RELEASE_SCRIPT: &str = r#"
local count = 0
for _, key in ipairs(KEYS) do
  if redis.call("get", key) == ARGV[1] then
    redis.call("del", key)
    count = count + 1
  end
end
return count
"#;

/// Minimum drift added on top of the proportional allowance
const DRIFT_FLOOR: Duration = Duration::from_millis(2);

/// Outcome of one node's vote
enum Vote {
    Granted,
    Denied,
    Failed(LockError),
}

struct LockNode {
    client: Client,
    connection: RwLock<Option<redis::aio::MultiplexedConnection>>,
}

impl LockNode {
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, LockError> {
        let mut connection = self.connection.write().await;

        if connection.is_none() {
            *connection = Some(self.client.get_multiplexed_async_connection().await?);
        }

        connection
            .as_ref()
            .cloned()
            .ok_or_else(|| LockError::Infrastructure("lock node connection unavailable".into()))
    }

    async fn try_acquire(&self, script: &Script, resources: &[String], token: &str, ttl_ms: u128) -> Vote {
        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(e) => return Vote::Failed(e),
        };

        let result: Result<i64, redis::RedisError> = script
            .key(resources)
            .arg(token)
            .arg(ttl_ms as u64)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(count) if count as usize == resources.len() => Vote::Granted,
            Ok(_) => Vote::Denied,
            Err(e) => Vote::Failed(self.forget_if_lost(e).await),
        }
    }

    async fn release(&self, script: &Script, resources: &[String], token: &str) -> Result<i64, LockError> {
        let mut conn = self.get_connection().await?;
        let result: Result<i64, redis::RedisError> =
            script.key(resources).arg(token).invoke_async(&mut conn).await;
        match result {
            Ok(released) => Ok(released),
            Err(e) => Err(self.forget_if_lost(e).await),
        }
    }

    /// Drop the cached connection when Redis went away, so the next vote reconnects
    async fn forget_if_lost(&self, error: redis::RedisError) -> LockError {
        if is_connection_lost(&error) && self.connection.write().await.take().is_some() {
            tracing::warn!(error = %error, "lock node connection lost, reconnecting on next vote");
        }
        error.into()
    }

    #[cfg(test)]
    async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }
}

/// Quorum lock over one or more Redis nodes
pub struct Redlock {
    nodes: Vec<Arc<LockNode>>,
    config: LockConfig,
    acquire_script: Script,
    release_script: Script,
}

impl Debug for Redlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redlock")
            .field("nodes", &self.nodes.len())
            .field("quorum", &self.quorum())
            .field("config", &self.config)
            .finish()
    }
}

impl Redlock {
    /// Create a lock over the given node URLs. Connections are opened lazily.
    pub fn new(node_urls: &[String], config: LockConfig) -> Result<Self, LockError> {
        if node_urls.is_empty() {
            return Err(LockError::NoNodes);
        }

        let nodes = node_urls
            .iter()
            .map(|url| {
                Ok(Arc::new(LockNode {
                    client: Client::open(url.as_str())?,
                    connection: RwLock::new(None),
                }))
            })
            .collect::<Result<Vec<_>, LockError>>()?;

        Ok(Self {
            nodes,
            config,
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    /// Number of nodes that must agree
    pub fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    fn drift(&self, ttl: Duration) -> Duration {
        ttl.mul_f64(self.config.drift_factor) + DRIFT_FLOOR
    }

    fn retry_pause(&self) -> Duration {
        let max_jitter = self.config.retry_jitter();
        let jitter = if max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::rng().random_range(Duration::ZERO..=max_jitter)
        };
        self.config.retry_delay() + jitter
    }

    async fn release_everywhere(&self, resources: &[String], token: &str) -> Result<(), LockError> {
        let results = join_all(
            self.nodes
                .iter()
                .map(|node| node.release(&self.release_script, resources, token)),
        )
        .await;

        let mut last_error = None;
        let mut answered = 0;
        for result in results {
            match result {
                Ok(_) => answered += 1,
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) if answered < self.quorum() => Err(e),
            Some(e) => {
                tracing::warn!(error = %e, "lock release failed on a minority of nodes");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DistributedLock for Redlock {
    async fn acquire(&self, resources: &[String], ttl: Duration) -> Result<LockHandle, LockError> {
        let ttl_ms = ttl.as_millis();
        if ttl_ms == 0 {
            return Err(LockError::InvalidTtl(ttl_ms));
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        let attempts = self.config.retry_count + 1;
        let mut any_node_answered = false;
        let mut last_failure = None;

        for attempt in 1..=attempts {
            let started = Instant::now();
            let votes = join_all(self.nodes.iter().map(|node| {
                node.try_acquire(&self.acquire_script, resources, &token, ttl_ms)
            }))
            .await;

            let mut granted = 0;
            for vote in votes {
                match vote {
                    Vote::Granted => {
                        granted += 1;
                        any_node_answered = true;
                    }
                    Vote::Denied => any_node_answered = true,
                    Vote::Failed(e) => last_failure = Some(e),
                }
            }

            let elapsed = started.elapsed();
            let spent = elapsed + self.drift(ttl);
            if granted >= self.quorum() && spent < ttl {
                return Ok(LockHandle::new(
                    resources.to_vec(),
                    token,
                    started + (ttl - spent),
                ));
            }

            if granted > 0 {
                if let Err(e) = self.release_everywhere(resources, &token).await {
                    tracing::warn!(error = %e, "failed to release partial lock holds");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry_pause()).await;
            }
        }

        if !any_node_answered {
            let reason = last_failure
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no lock node answered".to_string());
            return Err(LockError::Infrastructure(reason));
        }

        Err(LockError::QuorumNotReached { attempts })
    }

    async fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        self.release_everywhere(handle.resources(), handle.token()).await
    }

    async fn close(&self) -> Result<(), LockError> {
        for node in &self.nodes {
            node.connection.write().await.take();
        }
        Ok(())
    }
}
