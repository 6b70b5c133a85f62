use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::warn;

use super::circuit_breaker::CircuitBreaker;
use crate::errors::CallError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each following one
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Exponential-backoff wrapper around breaker-protected calls.
///
/// Stateless: every call gets a fresh backoff schedule. Open-breaker
/// rejections fail fast and are never retried.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry `k` is `base_delay * 2^k`
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base = self.config.base_delay();
        (0..self.config.max_retries).map(move |attempt| base.saturating_mul(2u32.saturating_pow(attempt)))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the retry budget is spent
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        RetryIf::spawn(
            self.delays(),
            || operation(),
            |e: &CallError| {
                if e.is_retryable() {
                    warn!("Retryable failure through '{}': {}", e.breaker_name(), e);
                    true
                } else {
                    false
                }
            },
        )
        .await
    }

    /// Breaker + retry composition used for every worker invocation
    pub async fn call<F, Fut, T>(&self, breaker: &CircuitBreaker, operation: F) -> Result<T, CallError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.run(|| breaker.call(&operation)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::{BreakerState, CircuitBreakerConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn executor(max_retries: u32, base_delay_ms: u64) -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            max_retries,
            base_delay_ms,
        })
    }

    #[test]
    fn test_backoff_schedule_doubles() {
        let delays: Vec<_> = executor(3, 2000).delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(executor(0, 2000).delays().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let counter = Arc::clone(&attempts);
        let result = executor(2, 2000)
            .run(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CallError::Failed {
                            name: "flaky".to_string(),
                            source: anyhow::anyhow!("transient"),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_open_fails_fast() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let err = executor(2, 2000)
            .run(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(CallError::Open {
                        name: "open".to_string(),
                        retry_in: Duration::from_secs(30),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_breaker_open());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_propagate_and_trip_breaker() {
        let breaker = CircuitBreaker::new(
            "bonds.llm_macro",
            CircuitBreakerConfig {
                fail_max: 3,
                reset_timeout_secs: 60.0,
                call_timeout_secs: 5.0,
            },
        );
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let err = executor(2, 100)
            .call(&breaker, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("model unavailable"))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Failed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state(), BreakerState::Open);

        let rejected = executor(2, 100)
            .call(&breaker, || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(rejected.is_breaker_open());
    }
}
