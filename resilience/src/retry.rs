//! Bounded retries with backoff and a per-attempt hard timeout.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * (attempt + 1)`
    Linear,
    /// `base * 2^attempt`
    Exponential,
}

/// Retry configuration, passed by value to each call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1).
    pub max_attempts: u32,
    /// Delay unit.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth curve.
    pub backoff: Backoff,
    /// Hard limit per attempt.
    pub timeout: Option<Duration>,
    /// Scale each delay by a random factor in [0.5, 1.0].
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff: Backoff::Exponential,
            timeout: Some(Duration::from_secs(10)),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay after the zero-based `attempt` failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = match self.backoff {
            Backoff::Linear => attempt.checked_add(1),
            Backoff::Exponential => 2u32.checked_pow(attempt),
        };

        factor
            .and_then(|f| self.base_delay.checked_mul(f))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Delay actually slept, with jitter applied when enabled.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if !self.jitter {
            return delay;
        }
        let scale = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(scale).min(self.max_delay)
    }
}

/// One failed attempt.
#[derive(Debug, Error, PartialEq)]
pub enum Failure<E> {
    /// The operation returned an error.
    #[error("{0}")]
    Operation(E),

    /// The operation did not finish in time.
    #[error("attempt timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Why the executor stopped retrying.
#[derive(Debug, Error, PartialEq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Failure<E> },

    /// The retry predicate refused to try again.
    #[error("not retried after attempt {attempts}: {failure}")]
    Declined { attempts: u32, failure: Failure<E> },
}

impl<E> RetryError<E> {
    /// Number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Declined { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Check if all attempts were used.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// The failure of the final attempt.
    pub fn into_failure(self) -> Failure<E> {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Declined { failure, .. } => failure,
        }
    }
}

/// Run `operation` until it succeeds, the policy runs out of attempts, or
/// `should_retry` declines an error.
///
/// Timeouts are always eligible for retry. No delay is slept after the last
/// attempt or after a declined error. A timed-out attempt is dropped, so its
/// result can never be observed.
pub async fn execute<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        let outcome = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(Failure::Operation),
                Err(_) => Err(Failure::Timeout(limit)),
            },
            None => operation().await.map_err(Failure::Operation),
        };

        let failure = match outcome {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(failure) => failure,
        };

        let attempts = attempt + 1;
        let retryable = match &failure {
            Failure::Operation(error) => should_retry(error),
            Failure::Timeout(_) => true,
        };

        if !retryable {
            debug!(attempts, error = %failure, "Error is not retryable");
            return Err(RetryError::Declined { attempts, failure });
        }

        if attempts >= max_attempts {
            warn!(attempts, error = %failure, "Giving up after final attempt");
            return Err(RetryError::Exhausted {
                attempts,
                last: failure,
            });
        }

        let delay = policy.next_delay(attempt);
        warn!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
