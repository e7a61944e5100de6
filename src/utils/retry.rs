//! Retry utilities for resilient operations
//!
//! Bounded exponential backoff with proportional jitter, shared by the
//! scheduler (dispatch retries) and the collection workers (scraper retries).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for retry behavior
///
/// `max_attempts` counts every call to the operation, including the first,
/// so `max_attempts = 3` means one call plus at most two retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts (at least 1)
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Fraction of each delay that is randomised, in `[0.0, 1.0]`.
    /// The actual delay is drawn uniformly from `[delay * (1 - jitter), delay]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy with a custom attempt budget
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a deterministic policy (no jitter) with custom delays
    pub fn with_delays(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Policy that never waits between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::with_delays(max_attempts, 0, 0)
    }

    /// Builder-style jitter override
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Backoff ceiling for the given retry (1-based), before jitter
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponential =
            self.base_delay_ms as f64 * self.backoff_multiplier.powi((retry - 1) as i32);
        Duration::from_millis((exponential as u64).min(self.max_delay_ms))
    }

    /// Delay actually slept before the given retry, jitter applied
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || ceiling.is_zero() {
            return ceiling;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        ceiling.mul_f64(factor)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Execute an operation with retry logic and exponential backoff
///
/// Returns `Ok(T)` on success, or the last error once the attempt budget is
/// exhausted.
///
/// # Example
///
/// ```no_run
/// use punchup::utils::retry::{with_retry, RetryPolicy};
///
/// # async fn example() -> Result<(), String> {
/// let policy = RetryPolicy::default();
/// let value = with_retry(&policy, || async { Ok::<_, String>(42) }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(policy, operation, |_| true).await
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// Errors for which `should_retry` returns `false` are returned immediately.
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    retry_loop(policy, None, operation, should_retry).await
}

/// Like [`with_retry_if`], but stops waiting for the next attempt once
/// `cancel` fires
///
/// An attempt already in progress is never interrupted. When the backoff is
/// cut short the error of the last attempt is returned.
pub async fn with_retry_until<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    retry_loop(policy, Some(cancel), operation, should_retry).await
}

async fn retry_loop<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                attempt += 1;
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }
                if attempt >= attempts {
                    warn!(attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(e);
                }
                warn!(
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Operation failed, will retry"
                );

                let delay = policy.delay_for(attempt);
                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying operation after delay"
                );
                match cancel {
                    Some(token) => {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                debug!(attempt = attempt, "Retry cancelled during backoff");
                                return Err(e);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }
}
