//! Exponential backoff retry combinator.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Retry schedule: `attempts` total invocations, sleeping
/// `base * multiplier^i` between the i-th failure and the next attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub attempts: u32,
    pub base: Duration,
    pub multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 4,
            base: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl Backoff {
    /// Delay before the attempt following the zero-based `attempt` failure.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(self.multiplier.saturating_pow(attempt))
    }
}

/// Invoke `op` until it succeeds, `should_retry` declines the error, or the
/// schedule is exhausted. Returns the first success or the last error.
pub async fn retry<T, E, F, Fut, P>(policy: &Backoff, should_retry: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let remaining = policy.attempts.saturating_sub(attempt + 1);
                if remaining == 0 || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.delay(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// [`retry`] with every error considered retryable.
#[allow(dead_code)] // general-purpose counterpart to retry, exercised in tests
pub async fn retry_all<T, E, F, Fut>(policy: &Backoff, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry(policy, |_| true, op).await
}
