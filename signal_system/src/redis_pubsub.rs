//! Redis pub/sub transport
//!
//! Uses one dedicated subscriber connection, split into a sink for
//! (un)subscribe commands and a stream drained by a background task that
//! feeds the [`WaitRegistry`], plus a separate multiplexed connection for
//! publishing.
//!
//! When the subscriber stream ends, the background task reconnects with
//! exponential backoff and re-subscribes every channel still in use. While
//! it is down, subscribe calls fail and waiters fall back to polling.

use crate::errors::SignalError;
use crate::registry::WaitRegistry;
use crate::transport::PubSubTransport;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};
use redis::{AsyncCommands, Client};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Connection state shared with the listener task
struct Shared {
    client: Client,
    /// `None` while the subscriber connection is being re-established
    sink: Mutex<Option<PubSubSink>>,
    channels: Mutex<HashSet<String>>,
    publisher: Mutex<Option<MultiplexedConnection>>,
    closed: AtomicBool,
}

impl Shared {
    /// Open a subscriber connection already subscribed to `channels`
    async fn open_subscriber(&self) -> Result<(PubSubSink, PubSubStream), SignalError> {
        let (mut sink, stream) = self.client.get_async_pubsub().await?.split();
        let channels: Vec<String> = self.channels.lock().await.iter().cloned().collect();
        if !channels.is_empty() {
            sink.subscribe(channels).await?;
        }
        Ok((sink, stream))
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, SignalError> {
        let mut publisher = self.publisher.lock().await;
        if let Some(conn) = publisher.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *publisher = Some(conn.clone());
        Ok(conn)
    }

    async fn forget_publisher(&self) {
        self.publisher.lock().await.take();
    }
}

pub struct RedisPubSub {
    shared: Arc<Shared>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RedisPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPubSub")
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RedisPubSub {
    /// Open the subscriber and publisher connections and start dispatching into `registry`
    pub async fn connect(url: &str, registry: Arc<WaitRegistry>) -> Result<Self, SignalError> {
        let shared = Arc::new(Shared {
            client: Client::open(url)?,
            sink: Mutex::new(None),
            channels: Mutex::new(HashSet::new()),
            publisher: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let (sink, stream) = shared.open_subscriber().await?;
        *shared.sink.lock().await = Some(sink);
        shared.publisher().await?;

        let listener = tokio::spawn(listen(shared.clone(), registry, stream));

        Ok(Self {
            shared,
            listener: std::sync::Mutex::new(Some(listener)),
        })
    }

    fn ensure_open(&self) -> Result<(), SignalError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SignalError::ShutDown);
        }
        Ok(())
    }
}

/// Drain the subscriber stream into `registry`, reconnecting whenever it ends
async fn listen(shared: Arc<Shared>, registry: Arc<WaitRegistry>, mut stream: PubSubStream) {
    loop {
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    let _woken = registry.dispatch(&channel, &payload);
                    debug_log!(channel = %channel, payload = %payload, woken = _woken, "lock event received");
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "failed to parse lock event payload");
                }
            }
        }

        if shared.closed.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!("pub/sub stream closed, reconnecting");
        shared.sink.lock().await.take();

        match reconnect(&shared).await {
            Some(next) => stream = next,
            None => return,
        }
    }
}

/// Re-open the subscriber connection with exponential backoff. `None` once shut down.
async fn reconnect(shared: &Shared) -> Option<PubSubStream> {
    let mut backoff = RECONNECT_BACKOFF_INITIAL;
    loop {
        tokio::time::sleep(backoff).await;
        if shared.closed.load(Ordering::SeqCst) {
            return None;
        }

        match shared.open_subscriber().await {
            Ok((sink, stream)) => {
                let channels = shared.channels.lock().await.len();
                let mut slot = shared.sink.lock().await;
                if shared.closed.load(Ordering::SeqCst) {
                    return None;
                }
                *slot = Some(sink);
                tracing::info!(channels, "pub/sub connection re-established");
                return Some(stream);
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in_ms = backoff.as_millis() as u64, "pub/sub reconnect failed");
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
}

#[async_trait]
impl PubSubTransport for RedisPubSub {
    async fn subscribe(&self, channel: &str) -> Result<(), SignalError> {
        self.ensure_open()?;
        // Recorded first so a reconnect in progress picks it up
        self.shared.channels.lock().await.insert(channel.to_string());

        let mut sink = self.shared.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink
                .subscribe(channel)
                .await
                .map_err(|e| SignalError::Subscribe(channel.to_string(), e.to_string())),
            None => Err(SignalError::Subscribe(
                channel.to_string(),
                "subscriber connection is reconnecting".to_string(),
            )),
        }
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), SignalError> {
        self.ensure_open()?;
        if !self.shared.channels.lock().await.remove(channel) {
            return Ok(());
        }

        let mut sink = self.shared.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => Ok(sink.unsubscribe(channel).await?),
            // The reconnect subscribes from the channel set, which no longer has it
            None => Ok(()),
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), SignalError> {
        self.ensure_open()?;
        let mut conn = self.shared.publisher().await?;
        let result: redis::RedisResult<i64> = conn.publish(channel, message).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.shared.forget_publisher().await;
                }
                Err(e.into())
            }
        }
    }

    async fn shutdown(&self) -> Result<(), SignalError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }

        let channels: Vec<String> = self.shared.channels.lock().await.drain().collect();
        let sink = self.shared.sink.lock().await.take();
        let result = match sink {
            Some(mut sink) if !channels.is_empty() => sink.unsubscribe(channels).await,
            _ => Ok(()),
        };
        self.shared.forget_publisher().await;

        tracing::info!("redis pub/sub transport shut down");
        result.map_err(SignalError::from)
    }
}
