//! Deadline and retry wrappers for outbound provider calls.
//!
//! Every attempt runs under [`with_timeout`]; [`with_retry`] repeats
//! retryable failures with exponential backoff (`base_delay * 2^attempt`).
//! Backoff sleeps are `tokio::time::sleep`, so other tasks keep running.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::GatewayError;

/// Race `fut` against a timer.
///
/// When the timer wins the future is dropped and its result is discarded.
/// The remote side may still have processed the request, so callers must
/// treat a timeout as an unknown outcome.
pub async fn with_timeout<F, T>(fut: F, limit: Duration) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit.as_millis() as u64)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Add up to one extra step of random delay.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Sleep before the attempt following `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        let delay = self.base_delay.saturating_mul(factor);
        if self.jitter && !delay.is_zero() {
            let extra = rand::rng().random_range(0..=delay.as_millis() as u64);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Returns the last error on failure.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || attempt >= max_attempts {
                    return Err(e);
                }

                let backoff = policy.delay_for(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
