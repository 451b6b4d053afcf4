//! Bounded retry with pluggable backoff.
//!
//! Stages call collaborators through [`retry_async`]; the attempt count and the
//! delay schedule are plain values so tests can assert on both.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use tracing::{debug, warn};

/// Classifies an error as worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Delay before the attempt following `attempt` (1-based).
pub trait Backoff: Send + Sync + fmt::Debug {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Doubles `base` after every failed attempt, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct ConstantBackoff(pub Duration);

impl Backoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Arc<dyn Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Arc::new(ExponentialBackoff::default()),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: impl Backoff + 'static) -> Self {
        Self {
            max_attempts,
            backoff: Arc::new(backoff),
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1, NoBackoff)
    }

    /// The full delay schedule between attempts.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.backoff.delay(attempt))
            .collect()
    }
}

/// Run `operation` until it succeeds, returns a non-retryable error, or the
/// policy runs out of attempts. The closure receives the 1-based attempt
/// number so callers can adjust the request between attempts.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff.delay(attempt);
                debug!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    ?delay,
                    error = %e,
                    "attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(operation = operation_name, attempts = attempt, error = %e, "giving up");
                }
                return Err(e);
            }
        }
    }
}
