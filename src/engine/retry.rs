//! Exponential-backoff retry driver for provider calls (spec §6/§7: rate-limit
//! and transient responses "enter an exponential-backoff retry with jitter,
//! up to 3 attempts").
//!
//! Ported from the teacher's `protocol::s3::recovery::{RetryPolicy, with_retry}`
//! shape, minus the circuit breaker: each action retries independently, there
//! is no cross-call failure memory to trip open.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::error::MeridianError;
use crate::provider::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0), added on top of the capped exponential delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt. A server-provided `retry_after_secs`
    /// hint (spec §7: RateLimited is "retried with backoff derived from
    /// server hint") always wins over the computed exponential delay.
    fn calculate_delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(secs) = retry_after_secs {
            return Duration::from_secs(secs);
        }

        let multiplier = 2_u32.saturating_pow(attempt - 1);
        let capped = (self.initial_delay * multiplier).min(self.max_delay);
        let jitter = rand::rng().random_range(0.0..self.jitter_factor);
        capped + Duration::from_secs_f64(capped.as_secs_f64() * jitter)
    }
}

/// Runs `operation` under `policy`, retrying while the error is
/// [`ProviderError::is_retriable`] and attempts remain. Any non-retriable
/// error returns immediately; a retriable error that survives all attempts
/// becomes [`MeridianError::RetriesExhausted`].
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, MeridianError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retriable() {
                    return Err(err.into());
                }

                if attempt >= policy.max_attempts {
                    warn!(attempts = attempt, error = %err, "retries exhausted");
                    return Err(MeridianError::RetriesExhausted { attempts: attempt });
                }

                let retry_after_secs = match &err {
                    ProviderError::RateLimited { retry_after_secs, .. } => *retry_after_secs,
                    _ => None,
                };
                let delay = policy.calculate_delay(attempt, retry_after_secs);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying provider call after backoff");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy { jitter_factor: 0.0, max_delay: Duration::from_secs(1), ..RetryPolicy::default() };
        assert_eq!(policy.calculate_delay(1, None), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2, None), Duration::from_millis(400));
        // 200ms * 2^2 = 800ms, still under the 1s cap
        assert_eq!(policy.calculate_delay(3, None), Duration::from_millis(800));
        // 200ms * 2^4 = 3.2s, capped at 1s
        assert_eq!(policy.calculate_delay(5, None), Duration::from_secs(1));
    }

    #[test]
    fn server_hint_overrides_computed_delay() {
        let policy = RetryPolicy { jitter_factor: 0.0, ..RetryPolicy::default() };
        assert_eq!(policy.calculate_delay(1, Some(30)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_until_success_within_attempt_budget() {
        let policy = RetryPolicy { initial_delay: Duration::from_millis(1), jitter_factor: 0.0, ..RetryPolicy::default() };
        let attempts = AtomicU32::new(0);

        let result: Result<u32, MeridianError> = with_retry(&policy, || {
            let current = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if current < 3 {
                    Err(ProviderError::RateLimited { provider: "dropbox".into(), retry_after_secs: None })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_yields_retries_exhausted() {
        let policy = RetryPolicy { max_attempts: 3, initial_delay: Duration::from_millis(1), jitter_factor: 0.0, ..RetryPolicy::default() };
        let attempts = AtomicU32::new(0);

        let result: Result<(), MeridianError> = with_retry(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Timeout { operation: "read".into(), duration_secs: 5 }) }
        })
        .await;

        assert!(matches!(result, Err(MeridianError::RetriesExhausted { attempts: 3 })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_error_fails_immediately() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<(), MeridianError> = with_retry(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::NotFound { path: Default::default(), provider: "local".into() }) }
        })
        .await;

        assert!(matches!(result, Err(MeridianError::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
