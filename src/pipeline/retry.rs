//! Bounded retry with exponential backoff for adapter calls.
//!
//! ## Retry Strategy
//!
//! 429 / 5xx answers from LLM and translation APIs are transient and common
//! under concurrent load. The wait before attempt `n` (1-based retry count) is
//! `backoff_ms * 2^(n-1)`: with the 500 ms default and 3 retries that is
//! 500 ms → 1 s → 2 s. A rate-limit answer that names its own delay is
//! honoured instead, capped at [`MAX_RETRY_AFTER`].
//!
//! Only [`AdapterError::is_retryable`] errors are retried; an auth failure
//! ends the loop at once.

use crate::config::PipelineConfig;
use crate::error::AdapterError;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Upper bound on a server-requested `Retry-After` delay.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32, error: &AdapterError) -> Duration {
        if let AdapterError::RateLimit {
            retry_after_secs: Some(secs),
        } = error
        {
            return Duration::from_secs(*secs).min(MAX_RETRY_AFTER);
        }
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
        }
    }
}

/// Outcome of [`with_retry`]: the final result and how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, AdapterError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's budget is spent. `label` prefixes the retry warnings.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if e.is_retryable() && attempt <= policy.max_retries => {
                let wait = policy.delay(attempt, &e);
                warn!(
                    "{}: attempt {} failed: {}; retry {}/{} after {:?}",
                    label, attempt, e, attempt, policy.max_retries, wait
                );
                sleep(wait).await;
            }
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}
