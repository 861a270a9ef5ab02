//! Per-source circuit breaker.
//!
//! ```text
//! Closed   -> Open      failure_count >= failure_threshold
//! Open     -> HalfOpen  can_attempt() after `timeout` since the last failure
//! HalfOpen -> Closed    success_threshold consecutive successes
//! HalfOpen -> Open      any failure
//! ```
//!
//! The breaker never fails on its own. Callers check [`CircuitBreaker::can_attempt`]
//! before issuing work and report the outcome afterwards.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use ratekeeper_common::{system_clock, SharedClock, Timestamp};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Wire name used in query responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name used in logs and health reports.
    pub name: String,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Open-state cooldown before a probe is allowed.
    pub timeout: Duration,
    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    /// Default thresholds under the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 3,
            timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Timestamp>,
    last_success_time: Option<Timestamp>,
    last_state_change: Timestamp,
}

/// Point-in-time view of a breaker for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Timestamp>,
    pub last_success_time: Option<Timestamp>,
    pub last_state_change: Timestamp,
    pub time_since_last_failure: Option<Duration>,
}

/// Failure tracker gating attempts against one upstream.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a breaker reading time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                last_success_time: None,
                last_state_change: now,
            }),
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state. Does not advance Open to HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures recorded since the breaker last closed.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Check whether a request may be issued now.
    ///
    /// In Open state this is also where the cooldown is evaluated: once it has
    /// elapsed the breaker moves to HalfOpen and admits a probe.
    pub fn can_attempt(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = match inner.last_failure_time {
                    Some(last) => (now - last).to_std().unwrap_or(Duration::ZERO) >= self.config.timeout,
                    None => true,
                };

                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.last_state_change = now;
                    info!(breaker = %self.config.name, "Circuit breaker transitioning to half-open");
                }

                cooled_down
            }
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_success_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_state_change = now;
                    info!(breaker = %self.config.name, "Circuit breaker closed after successful recovery");
                }
            }
            // A late success from a request admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.last_state_change = now;
                warn!(breaker = %self.config.name, "Circuit breaker reopened after half-open failure");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.last_state_change = now;
                error!(
                    breaker = %self.config.name,
                    failures = inner.failure_count,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
        inner.last_state_change = now;
        info!(breaker = %self.config.name, "Circuit breaker manually reset");
    }

    /// Get metrics for monitoring.
    pub fn metrics(&self) -> BreakerMetrics {
        let now = self.clock.now();
        let inner = self.inner.lock();
        BreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            last_state_change: inner.last_state_change,
            time_since_last_failure: inner
                .last_failure_time
                .map(|t| (now - t).to_std().unwrap_or(Duration::ZERO)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use ratekeeper_common::ManualClock;
    use std::sync::Arc;

    fn breaker(threshold: u32, success_threshold: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        let config = CircuitBreakerConfig {
            name: "test".to_string(),
            failure_threshold: threshold,
            timeout: Duration::from_secs(30),
            success_threshold,
        };
        (CircuitBreaker::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_opens_after_threshold() {
        for threshold in 1..=6 {
            let (cb, _) = breaker(threshold, 1);

            for _ in 0..threshold - 1 {
                cb.record_failure();
                assert_eq!(cb.state(), CircuitState::Closed);
            }
            cb.record_failure();

            assert_eq!(cb.state(), CircuitState::Open);
            assert!(!cb.can_attempt());
        }
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (cb, _) = breaker(3, 1);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_rejects_before_timeout() {
        let (cb, clock) = breaker(2, 1);
        cb.record_failure();
        cb.record_failure();

        clock.advance(ChronoDuration::seconds(29));

        assert!(!cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_probe_then_failure_reopens() {
        let (cb, clock) = breaker(2, 1);
        cb.record_failure();
        cb.record_failure();

        clock.advance(ChronoDuration::seconds(30));
        assert!(cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_attempt());
    }

    #[test]
    fn test_half_open_probe_then_success_closes() {
        let (cb, clock) = breaker(2, 1);
        cb.record_failure();
        cb.record_failure();

        clock.advance(ChronoDuration::seconds(31));
        assert!(cb.can_attempt());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_success_threshold_requires_consecutive_successes() {
        let (cb, clock) = breaker(1, 3);
        cb.record_failure();
        clock.advance(ChronoDuration::seconds(30));
        assert!(cb.can_attempt());

        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.failure_count(), 1);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_reopen_restarts_cooldown() {
        let (cb, clock) = breaker(1, 1);
        cb.record_failure();
        clock.advance(ChronoDuration::seconds(30));
        assert!(cb.can_attempt());
        cb.record_failure();

        clock.advance(ChronoDuration::seconds(10));
        assert!(!cb.can_attempt());

        clock.advance(ChronoDuration::seconds(20));
        assert!(cb.can_attempt());
    }

    #[test]
    fn test_reset() {
        let (cb, _) = breaker(1, 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.can_attempt());
    }

    #[test]
    fn test_metrics() {
        let (cb, clock) = breaker(3, 1);
        cb.record_failure();
        clock.advance(ChronoDuration::seconds(5));

        let metrics = cb.metrics();

        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.time_since_last_failure, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.as_str(), "open");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
    }
}
