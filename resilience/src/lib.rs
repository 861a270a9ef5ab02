//! Ratekeeper Resilience
//!
//! Failure handling around flaky upstreams.
//!
//! # Features
//!
//! - Per-source circuit breaker (Closed / Open / HalfOpen)
//! - Retry executor with linear or exponential backoff and a hard timeout
//! - Health monitor tracking consecutive failures per source
//!
//! # Example
//!
//! ```rust,ignore
//! use ratekeeper_resilience::{retry, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::named("bcv"));
//! if breaker.can_attempt() {
//!     match retry::execute(&RetryPolicy::default(), || fetch(), |e| e.is_retryable()).await {
//!         Ok(_) => breaker.record_success(),
//!         Err(_) => breaker.record_failure(),
//!     }
//! }
//! ```

pub mod circuit_breaker;
pub mod health;
pub mod retry;

pub use circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{HealthMonitor, HealthStatus};
pub use retry::{Backoff, Failure, RetryError, RetryPolicy};
