//! Ratekeeper Engine
//!
//! Serves exchange rates from unreliable upstreams without ever failing the
//! caller.
//!
//! # Features
//!
//! - Success cache with a configurable TTL
//! - Per-source circuit breaker and retry policy
//! - Last-known-good and static-default fallbacks annotated with a reason
//! - Health report and counters for monitoring
//!
//! # Example
//!
//! ```rust,ignore
//! use ratekeeper_engine::{EngineConfig, RateEngine};
//!
//! let config = EngineConfig::from_env()?;
//! let engine = RateEngine::from_config(&config)?;
//!
//! let response = engine.get_rate_response("bcv").await?;
//! println!("{}", serde_json::to_string(&response)?);
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod query;

pub use cache::{CacheEntry, CacheStats, CacheTier, TieredCache};
pub use config::{BcvConfig, EngineConfig, P2pConfig, SourcePolicy, ENV_PREFIX};
pub use engine::{RateEngine, RateQuote};
pub use error::{ConfigError, EngineError, EngineResult};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use query::{HealthReport, RateResponse};
