//! Usage statistics
//!
//! Counters live in the store under
//! `{key_prefix}:stats:{counter}:{subject}`. Every write runs as a detached
//! task: the request path never waits for it, and a failed write is only
//! logged.

use cache_system::{CacheError, KeyValueStore};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const USAGE_COUNT: &str = "callback_usage_count";
pub const REQUEST_OBJECT: &str = "callback_request_object";
pub const RETRIES_SUM: &str = "callback_retries_sum";
pub const LISTENERS_COUNT: &str = "callback_listeners_count";
pub const SUCCESS_LISTENS_COUNT: &str = "callback_successListens_count";

#[derive(Debug, Clone)]
pub struct UsageStats {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl UsageStats {
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: &str) -> Self {
        Self {
            store,
            key_prefix: key_prefix.to_string(),
        }
    }

    pub fn stat_key(&self, counter: &str, subject: &str) -> String {
        format!("{}:stats:{}:{}", self.key_prefix, counter, subject)
    }

    /// A generator run finished: count it, keep the request body, add its retries
    pub fn record_usage(&self, namespace: &str, retries: u32, request_body: String) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(3);

        let store = self.store.clone();
        let key = self.stat_key(USAGE_COUNT, namespace);
        tasks.push(self.spawn(key.clone(), async move { store.incr(&key).await.map(drop) }));

        let store = self.store.clone();
        let key = self.stat_key(REQUEST_OBJECT, namespace);
        tasks.push(self.spawn(key.clone(), async move { store.set(&key, &request_body).await }));

        if retries > 0 {
            let store = self.store.clone();
            let key = self.stat_key(RETRIES_SUM, namespace);
            tasks.push(self.spawn(key.clone(), async move {
                store.incr_by(&key, i64::from(retries)).await.map(drop)
            }));
        }

        tasks
    }

    /// A caller lost the lock race and started waiting
    pub fn record_listener(&self, cache_key: &str) -> JoinHandle<()> {
        self.increment(LISTENERS_COUNT, cache_key)
    }

    /// A waiter was woken by an unlock event
    pub fn record_success_listen(&self, cache_key: &str) -> JoinHandle<()> {
        self.increment(SUCCESS_LISTENS_COUNT, cache_key)
    }

    fn increment(&self, counter: &str, subject: &str) -> JoinHandle<()> {
        let store = self.store.clone();
        let key = self.stat_key(counter, subject);
        self.spawn(key.clone(), async move { store.incr(&key).await.map(drop) })
    }

    fn spawn<F>(&self, key: String, write: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), CacheError>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = write.await {
                tracing::warn!(key = %key, error = %e, "usage stats write failed");
            }
        })
    }
}
