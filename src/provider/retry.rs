// src/provider/retry.rs — Retry with exponential backoff for external APIs
//
// Retries: rate limits (429), server errors (5xx), timeouts, connection resets.
// Does NOT retry: bad request (400), auth errors (401, 403), parse failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, ModelProvider};
use crate::infra::config::BackoffConfig;
use crate::infra::errors::DeskError;

const BACKOFF_FACTOR: f64 = 2.0;
const JITTER_FRACTION: f64 = 0.2;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_backoff(&BackoffConfig::default())
    }
}

impl RetryConfig {
    pub fn from_backoff(cfg: &BackoffConfig) -> Self {
        Self {
            max_retries: cfg.max_attempts.saturating_sub(1),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            backoff_factor: BACKOFF_FACTOR,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter_fraction: JITTER_FRACTION,
        }
    }

    /// Delay before retry `attempt` (0-indexed). A server-provided
    /// rate-limit hint wins over the exponential schedule.
    pub fn delay_for_attempt(&self, attempt: u32, error: &DeskError) -> Duration {
        if let Some(rl_delay) = rate_limit_delay(error) {
            return rl_delay.min(self.max_delay) + Duration::from_millis(100);
        }

        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jitter = deterministic_jitter(attempt, self.jitter_fraction);
        Duration::from_millis((capped_ms * jitter) as u64)
    }
}

/// Determine if an error should be retried.
pub fn should_retry(error: &DeskError) -> bool {
    error.is_retriable()
}

fn rate_limit_delay(error: &DeskError) -> Option<Duration> {
    match error {
        DeskError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Deterministic jitter for a given attempt to keep retries reproducible in tests.
/// Returns a multiplier in [1 - fraction, 1 + fraction].
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

/// A provider wrapper that adds retry with exponential backoff to `chat()`.
pub struct RetryProvider {
    inner: Arc<dyn ModelProvider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn ModelProvider>) -> Self {
        Self {
            inner,
            config: RetryConfig::default(),
        }
    }

    pub fn with_config(inner: Arc<dyn ModelProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl ModelProvider for RetryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeskError> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !should_retry(&e) || attempt >= self.config.max_retries {
                        return Err(e);
                    }
                    let delay = self.config.delay_for_attempt(attempt, &e);
                    tracing::warn!(
                        provider = self.inner.id(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{StopReason, TokenUsage};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> DeskError {
        DeskError::Provider {
            provider: "test".into(),
            message: "HTTP 503".into(),
            retriable: true,
        }
    }

    #[test]
    fn test_rate_limit_hint_wins() {
        let cfg = RetryConfig::default();
        let err = DeskError::RateLimited {
            provider: "test".into(),
            retry_after_ms: 3000,
        };
        assert_eq!(cfg.delay_for_attempt(0, &err), Duration::from_millis(3100));
    }

    #[test]
    fn test_delay_exponential_and_capped() {
        let cfg = RetryConfig::default();
        let d0 = cfg.delay_for_attempt(0, &transient());
        let d1 = cfg.delay_for_attempt(1, &transient());
        assert!(d0.as_millis() >= 1600 && d0.as_millis() <= 2400);
        assert!(d1.as_millis() >= 3200 && d1.as_millis() <= 4800);
        let d = cfg.delay_for_attempt(12, &transient());
        assert!(d.as_millis() <= 36_000);
    }

    #[test]
    fn test_from_backoff_counts_retries() {
        let cfg = RetryConfig::from_backoff(&BackoffConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 20,
        });
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(RetryConfig::from_backoff(&BackoffConfig { max_attempts: 0, ..Default::default() }).max_retries, 0);
    }

    #[test]
    fn test_deterministic_jitter_range() {
        for attempt in 0..20 {
            let j = deterministic_jitter(attempt, 0.2);
            assert!((0.8..=1.2).contains(&j), "jitter {j} out of range");
        }
    }

    struct Flaky {
        calls: AtomicU32,
        fail_times: u32,
        error: fn() -> DeskError,
    }

    #[async_trait]
    impl ModelProvider for Flaky {
        fn id(&self) -> &str {
            "flaky"
        }
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, DeskError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err((self.error)());
            }
            Ok(ChatResponse {
                content: "{}".into(),
                usage: TokenUsage::default(),
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig::from_backoff(&BackoffConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        })
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times: 2,
            error: transient,
        });
        let provider = RetryProvider::with_config(inner.clone(), fast());
        assert!(provider.chat(ChatRequest::default()).await.is_ok());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times: 10,
            error: transient,
        });
        let provider = RetryProvider::with_config(inner.clone(), fast());
        assert!(provider.chat(ChatRequest::default()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        fn bad_request() -> DeskError {
            DeskError::Provider {
                provider: "test".into(),
                message: "HTTP 400".into(),
                retriable: false,
            }
        }
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times: 10,
            error: bad_request,
        });
        let provider = RetryProvider::with_config(inner.clone(), fast());
        assert!(provider.chat(ChatRequest::default()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
