//! Retrying generator execution
//!
//! Knows nothing about caching or locking. Attempt `i` (starting at 0) that
//! fails is followed by a pause of `i * interval` before the next attempt,
//! so the first retry is immediate and later ones back off linearly.

use crate::endpoint::Generator;
use crate::errors::StampedeError;
use crate::handler::Request;
use serde_json::Value;
use std::time::Duration;

/// Successful generator run
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Failed attempts before the successful one
    pub retry_attempts: u32,
    pub result: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct CallbackExecutor {
    max_attempts: u32,
    interval: Duration,
}

impl CallbackExecutor {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub async fn execute(&self, generator: &Generator, request: &Request) -> Result<Execution, StampedeError> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            match generator(request.clone()).await {
                Ok(result) => {
                    debug_log!(attempt, "callback execution successful");
                    return Ok(Execution {
                        retry_attempts: attempt,
                        result,
                    });
                }
                Err(e) => {
                    let pause = self.interval * attempt;
                    tracing::info!(
                        attempt,
                        retry_in_ms = pause.as_millis() as u64,
                        error = %e,
                        "callback attempt failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }

        tracing::error!(
            attempts = self.max_attempts,
            last_error = ?last_error,
            "Callback execution failed. Retried {} times.",
            self.max_attempts
        );
        Err(StampedeError::GeneratorExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Generator failing its first `failures` calls
    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> Generator {
        Arc::new(move |_request| -> BoxFuture<'static, anyhow::Result<Value>> {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if call < failures {
                    anyhow::bail!("upstream returned 503");
                }
                Ok(json!({"status": 200, "message": "success"}))
            })
        })
    }

    fn request() -> Request {
        Request::new("/users/1", json!({}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = CallbackExecutor::new(4, Duration::from_millis(200));

        let execution = executor.execute(&flaky(0, calls.clone()), &request()).await.unwrap();
        assert_eq!(execution.retry_attempts, 0);
        assert_eq!(execution.result["message"], "success");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_starts_at_zero() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = CallbackExecutor::new(4, Duration::from_millis(200));
        let started = Instant::now();

        let execution = executor.execute(&flaky(3, calls.clone()), &request()).await.unwrap();

        assert_eq!(execution.retry_attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 0ms + 200ms + 400ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(600));
        assert!(elapsed < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = CallbackExecutor::new(4, Duration::from_millis(200));
        let started = Instant::now();

        let err = executor.execute(&flaky(10, calls.clone()), &request()).await.unwrap_err();

        assert!(matches!(err, StampedeError::GeneratorExhausted { attempts: 4 }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // No pause after the final attempt
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(600));
        assert!(elapsed < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_zero_attempts_never_calls_generator() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = CallbackExecutor::new(0, Duration::from_millis(200));

        let err = executor.execute(&flaky(0, calls.clone()), &request()).await.unwrap_err();
        assert!(matches!(err, StampedeError::GeneratorExhausted { attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
