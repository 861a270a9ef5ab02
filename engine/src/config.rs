//! Engine configuration.

use std::str::FromStr;
use std::time::Duration;

use ratekeeper_common::{defaults, StaticRate};
use ratekeeper_resilience::{Backoff, CircuitBreakerConfig, RetryPolicy};
use ratekeeper_sources::orderbook::client::DEFAULT_P2P_ENDPOINT;
use ratekeeper_sources::{RateBounds, SpreadDirection, DEFAULT_BCV_URL};

use crate::error::ConfigError;

/// Prefix shared by every environment variable the engine reads.
pub const ENV_PREFIX: &str = "RATEKEEPER_";

/// Breaker and retry settings for one source.
#[derive(Debug, Clone)]
pub struct SourcePolicy {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
}

impl SourcePolicy {
    /// Default policy with the breaker named after the source.
    pub fn named(name: &str) -> Self {
        Self {
            breaker: CircuitBreakerConfig::named(name),
            retry: RetryPolicy {
                jitter: true,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Official bulletin scraper configuration.
#[derive(Debug, Clone)]
pub struct BcvConfig {
    pub url: String,
    pub request_timeout: Duration,
    /// The bulletin's TLS chain is often incomplete.
    pub accept_invalid_certs: bool,
    pub usd_bounds: Option<RateBounds>,
    pub eur_bounds: Option<RateBounds>,
    pub min_confidence: f64,
    pub static_default: StaticRate,
    pub policy: SourcePolicy,
}

impl Default for BcvConfig {
    fn default() -> Self {
        let mut policy = SourcePolicy::named("bcv");
        policy.retry.timeout = Some(Duration::from_secs(20));

        Self {
            url: DEFAULT_BCV_URL.to_string(),
            request_timeout: Duration::from_secs(15),
            accept_invalid_certs: false,
            usd_bounds: None,
            eur_bounds: None,
            min_confidence: 0.3,
            static_default: defaults::BCV,
            policy,
        }
    }
}

/// P2P order-book configuration.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    pub endpoint: String,
    pub fiat: String,
    pub target_asset: String,
    pub fallback_asset: String,
    pub pages: u32,
    pub rows_per_page: u32,
    pub page_delay: Duration,
    pub request_timeout: Duration,
    pub price_bounds: Option<RateBounds>,
    pub spread: SpreadDirection,
    pub filter_outliers: bool,
    pub full_confidence_samples: usize,
    pub static_default: StaticRate,
    pub policy: SourcePolicy,
}

impl Default for P2pConfig {
    fn default() -> Self {
        let mut policy = SourcePolicy::named("p2p");
        policy.retry.timeout = Some(Duration::from_secs(30));

        Self {
            endpoint: DEFAULT_P2P_ENDPOINT.to_string(),
            fiat: "VES".to_string(),
            target_asset: "USDT".to_string(),
            fallback_asset: "BUSD".to_string(),
            pages: 2,
            rows_per_page: 20,
            page_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
            price_bounds: None,
            spread: SpreadDirection::SellMinusBuy,
            filter_outliers: true,
            full_confidence_samples: 20,
            static_default: defaults::P2P,
            policy,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a successful fetch is served without refetching.
    pub success_ttl: Duration,
    /// Consecutive failures before a source is reported unhealthy.
    pub unhealthy_after: u32,
    /// Background refresh period used by the daemon.
    pub refresh_interval: Duration,
    pub bcv: BcvConfig,
    pub p2p: P2pConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            success_ttl: Duration::from_secs(30),
            unhealthy_after: 5,
            refresh_interval: Duration::from_secs(60),
            bcv: BcvConfig::default(),
            p2p: P2pConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `RATEKEEPER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Unset keys keep their
    /// defaults; set but unparseable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::default();

        if let Some(secs) = env.parse::<u64>("SUCCESS_TTL_SECS")? {
            config.success_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = env.parse("UNHEALTHY_AFTER")? {
            config.unhealthy_after = n;
        }
        if let Some(secs) = env.parse::<u64>("REFRESH_INTERVAL_SECS")? {
            config.refresh_interval = Duration::from_secs(secs);
        }

        let bcv = &mut config.bcv;
        if let Some(url) = env.string("BCV_URL") {
            bcv.url = url;
        }
        if let Some(ms) = env.parse::<u64>("BCV_TIMEOUT_MS")? {
            bcv.request_timeout = Duration::from_millis(ms);
        }
        if let Some(accept) = env.parse("BCV_ACCEPT_INVALID_CERTS")? {
            bcv.accept_invalid_certs = accept;
        }
        bcv.usd_bounds = env.bounds("BCV_USD_MIN", "BCV_USD_MAX")?.or(bcv.usd_bounds);
        bcv.eur_bounds = env.bounds("BCV_EUR_MIN", "BCV_EUR_MAX")?.or(bcv.eur_bounds);
        env.apply_policy("BCV", &mut bcv.policy)?;

        let p2p = &mut config.p2p;
        if let Some(endpoint) = env.string("P2P_ENDPOINT") {
            p2p.endpoint = endpoint;
        }
        if let Some(fiat) = env.string("P2P_FIAT") {
            p2p.fiat = fiat;
        }
        if let Some(asset) = env.string("P2P_TARGET_ASSET") {
            p2p.target_asset = asset;
        }
        if let Some(asset) = env.string("P2P_FALLBACK_ASSET") {
            p2p.fallback_asset = asset;
        }
        if let Some(pages) = env.parse("P2P_PAGES")? {
            p2p.pages = pages;
        }
        if let Some(rows) = env.parse("P2P_ROWS_PER_PAGE")? {
            p2p.rows_per_page = rows;
        }
        if let Some(ms) = env.parse::<u64>("P2P_PAGE_DELAY_MS")? {
            p2p.page_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<u64>("P2P_TIMEOUT_MS")? {
            p2p.request_timeout = Duration::from_millis(ms);
        }
        p2p.price_bounds = env.bounds("P2P_MIN_PRICE", "P2P_MAX_PRICE")?.or(p2p.price_bounds);
        env.apply_policy("P2P", &mut p2p.policy)?;

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.success_ttl.is_zero() {
            return invalid("Success TTL cannot be 0");
        }
        if self.unhealthy_after == 0 {
            return invalid("Unhealthy threshold cannot be 0");
        }
        if self.refresh_interval.is_zero() {
            return invalid("Refresh interval cannot be 0");
        }
        if self.bcv.url.is_empty() {
            return invalid("Bulletin URL cannot be empty");
        }
        if self.p2p.endpoint.is_empty() {
            return invalid("P2P endpoint cannot be empty");
        }
        if self.p2p.target_asset.is_empty() || self.p2p.fallback_asset.is_empty() {
            return invalid("P2P assets cannot be empty");
        }
        if self.p2p.pages == 0 || self.p2p.rows_per_page == 0 {
            return invalid("P2P pages and rows per page must be positive");
        }
        if !(0.0..=1.0).contains(&self.bcv.min_confidence) {
            return invalid("Minimum confidence must be within [0, 1]");
        }

        for bounds in [self.bcv.usd_bounds, self.bcv.eur_bounds, self.p2p.price_bounds]
            .into_iter()
            .flatten()
        {
            if bounds.min > bounds.max {
                return invalid("Lower bound cannot exceed upper bound");
            }
        }

        for policy in [&self.bcv.policy, &self.p2p.policy] {
            if policy.breaker.failure_threshold == 0 || policy.breaker.success_threshold == 0 {
                return invalid("Breaker thresholds must be positive");
            }
            if policy.retry.max_attempts == 0 {
                return invalid("Retry max attempts must be at least 1");
            }
            if policy.retry.base_delay > policy.retry.max_delay {
                return invalid("Retry base delay cannot exceed max delay");
            }
        }

        Ok(())
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    var: format!("{ENV_PREFIX}{key}"),
                    value: raw,
                }),
        }
    }

    fn bounds(&self, min_key: &str, max_key: &str) -> Result<Option<RateBounds>, ConfigError> {
        match (self.parse::<f64>(min_key)?, self.parse::<f64>(max_key)?) {
            (None, None) => Ok(None),
            (min, max) => Ok(Some(RateBounds::new(
                min.unwrap_or(0.0),
                max.unwrap_or(f64::MAX),
            ))),
        }
    }

    fn apply_policy(&self, source: &str, policy: &mut SourcePolicy) -> Result<(), ConfigError> {
        if let Some(n) = self.parse(&format!("{source}_FAILURE_THRESHOLD"))? {
            policy.breaker.failure_threshold = n;
        }
        if let Some(secs) = self.parse::<u64>(&format!("{source}_BREAKER_TIMEOUT_SECS"))? {
            policy.breaker.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = self.parse(&format!("{source}_SUCCESS_THRESHOLD"))? {
            policy.breaker.success_threshold = n;
        }
        if let Some(n) = self.parse(&format!("{source}_MAX_ATTEMPTS"))? {
            policy.retry.max_attempts = n;
        }
        if let Some(ms) = self.parse::<u64>(&format!("{source}_BASE_DELAY_MS"))? {
            policy.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.parse::<u64>(&format!("{source}_MAX_DELAY_MS"))? {
            policy.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(linear) = self.parse::<bool>(&format!("{source}_LINEAR_BACKOFF"))? {
            policy.retry.backoff = if linear {
                Backoff::Linear
            } else {
                Backoff::Exponential
            };
        }
        if let Some(jitter) = self.parse(&format!("{source}_JITTER"))? {
            policy.retry.jitter = jitter;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.success_ttl, Duration::from_secs(30));
        assert_eq!(config.bcv.policy.breaker.name, "bcv");
        assert_eq!(config.p2p.policy.retry.max_attempts, 3);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = EngineConfig::default();
        config.success_ttl = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.p2p.policy.retry.base_delay = Duration::from_secs(60);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.bcv.usd_bounds = Some(RateBounds::new(300.0, 100.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("RATEKEEPER_SUCCESS_TTL_SECS", "45"),
            ("RATEKEEPER_BCV_URL", "https://mirror.example/bcv"),
            ("RATEKEEPER_BCV_ACCEPT_INVALID_CERTS", "true"),
            ("RATEKEEPER_BCV_USD_MIN", "150"),
            ("RATEKEEPER_P2P_TARGET_ASSET", "USDC"),
            ("RATEKEEPER_P2P_MAX_ATTEMPTS", "5"),
            ("RATEKEEPER_P2P_LINEAR_BACKOFF", "true"),
        ]))
        .unwrap();

        assert_eq!(config.success_ttl, Duration::from_secs(45));
        assert_eq!(config.bcv.url, "https://mirror.example/bcv");
        assert!(config.bcv.accept_invalid_certs);
        assert_eq!(config.bcv.usd_bounds, Some(RateBounds::new(150.0, f64::MAX)));
        assert_eq!(config.bcv.eur_bounds, None);
        assert_eq!(config.p2p.target_asset, "USDC");
        assert_eq!(config.p2p.policy.retry.max_attempts, 5);
        assert_eq!(config.p2p.policy.retry.backoff, Backoff::Linear);
        assert_eq!(config.bcv.policy.retry.max_attempts, 3);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup(&[("RATEKEEPER_P2P_PAGES", "two")])).unwrap_err();

        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "RATEKEEPER_P2P_PAGES".to_string(),
                value: "two".to_string()
            }
        );
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = EngineConfig::from_lookup(lookup(&[("RATEKEEPER_BCV_URL", "  ")])).unwrap();
        assert_eq!(config.bcv.url, DEFAULT_BCV_URL);
    }
}
