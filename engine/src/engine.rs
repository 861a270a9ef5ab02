//! The rate engine: cache, circuit breaker, retry and fallback chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ratekeeper_common::{system_clock, RateSnapshot, SharedClock, SourceError, SourceKind};
use ratekeeper_resilience::{
    retry, CircuitBreaker, CircuitState, Failure, HealthMonitor, HealthStatus, RetryError,
    RetryPolicy,
};
use ratekeeper_sources::orderbook::client::{P2pClient, P2pClientConfig};
use ratekeeper_sources::{
    AggregatorConfig, BcvSource, HtmlExtractor, HttpPageFetcher, OrderBookAggregator, P2pSource,
    P2pSourceConfig, RateSource,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, CacheTier, TieredCache};
use crate::config::{EngineConfig, SourcePolicy};
use crate::error::{EngineError, EngineResult};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::query::{HealthReport, RateResponse};

/// Reason reported when neither live nor cached data exists.
pub const NO_DATA_REASON: &str = "no data available";

/// A rate answer, always structurally valid.
#[derive(Debug, Clone, PartialEq)]
pub struct RateQuote {
    /// Registered source name.
    pub source: String,
    pub kind: SourceKind,
    pub snapshot: RateSnapshot,
    /// Tier the snapshot was served from.
    pub tier: CacheTier,
    /// True unless the snapshot is fresh (live or within the success TTL).
    pub fallback: bool,
    pub fallback_reason: Option<String>,
    /// Age of a cached snapshot. `None` for live and static answers.
    pub cache_age_seconds: Option<u64>,
    /// Breaker state after the request.
    pub circuit_state: CircuitState,
}

/// A registered source with its own breaker and retry policy.
struct SourceSlot {
    source: Arc<dyn RateSource>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

/// Rate-acquisition engine.
///
/// Shared by `Arc`; every method takes `&self`.
pub struct RateEngine {
    sources: HashMap<String, SourceSlot>,
    cache: TieredCache,
    health: HealthMonitor,
    metrics: EngineMetrics,
    clock: SharedClock,
}

impl RateEngine {
    /// Create an engine with no sources.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create an engine whose cache, breakers and health monitor read time
    /// from `clock`.
    pub fn with_clock(config: &EngineConfig, clock: SharedClock) -> Self {
        Self {
            sources: HashMap::new(),
            cache: TieredCache::with_clock(config.success_ttl, clock.clone()),
            health: HealthMonitor::with_clock(config.unhealthy_after, clock.clone()),
            metrics: EngineMetrics::new(),
            clock,
        }
    }

    /// Register a source under its own name.
    pub fn with_source(
        mut self,
        source: Arc<dyn RateSource>,
        policy: SourcePolicy,
    ) -> EngineResult<Self> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(EngineError::DuplicateSource(name));
        }

        let breaker = CircuitBreaker::with_clock(policy.breaker, self.clock.clone());
        self.sources.insert(
            name,
            SourceSlot {
                source,
                breaker,
                retry: policy.retry,
            },
        );
        Ok(self)
    }

    /// Build the production engine: the bulletin scraper and the P2P order
    /// book over real HTTP clients.
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let bcv = &config.bcv;
        let fetcher = HttpPageFetcher::new(bcv.request_timeout, bcv.accept_invalid_certs)?;
        let extractor = HtmlExtractor::default()
            .with_min_confidence(bcv.min_confidence)
            .with_bounds(bcv.usd_bounds, bcv.eur_bounds);
        let bcv_source = BcvSource::new(bcv.url.clone(), Arc::new(fetcher))
            .with_extractor(extractor)
            .with_static_default(bcv.static_default);

        let p2p = &config.p2p;
        let client = P2pClient::new(P2pClientConfig {
            endpoint: p2p.endpoint.clone(),
            fiat: p2p.fiat.clone(),
            pages: p2p.pages,
            rows_per_page: p2p.rows_per_page,
            page_delay: p2p.page_delay,
            request_timeout: p2p.request_timeout,
        })?;
        let aggregator = OrderBookAggregator::new(
            Arc::new(client),
            AggregatorConfig {
                price_bounds: p2p.price_bounds,
                spread: p2p.spread,
                filter_outliers: p2p.filter_outliers,
            },
        );
        let p2p_source = P2pSource::new(
            aggregator,
            P2pSourceConfig {
                target_asset: p2p.target_asset.clone(),
                fallback_asset: p2p.fallback_asset.clone(),
                full_confidence_samples: p2p.full_confidence_samples,
            },
        )
        .with_static_default(p2p.static_default);

        Self::new(config)
            .with_source(Arc::new(bcv_source), bcv.policy.clone())?
            .with_source(Arc::new(p2p_source), p2p.policy.clone())
    }

    /// Current rate for `source`.
    ///
    /// Serves a fresh cached snapshot when one exists, otherwise fetches
    /// live and falls back to the last known good snapshot or the static
    /// default. Only an unknown source name is an error.
    #[instrument(skip(self), fields(request_id = %Uuid::now_v7()))]
    pub async fn get_rate(&self, source: &str) -> EngineResult<RateQuote> {
        let slot = self.slot(source)?;
        self.metrics.request();

        if let Some(entry) = self.cache.fresh_success(source) {
            self.metrics.cache_hit();
            return Ok(RateQuote {
                source: source.to_string(),
                kind: slot.source.kind(),
                cache_age_seconds: Some(entry.age_seconds(self.clock.now())),
                snapshot: entry.snapshot,
                tier: CacheTier::Success,
                fallback: false,
                fallback_reason: None,
                circuit_state: slot.breaker.state(),
            });
        }

        Ok(self.fetch_or_fallback(source, slot).await)
    }

    /// Fetch `source` live regardless of the cache, falling back like
    /// [`get_rate`](Self::get_rate) on failure.
    #[instrument(skip(self), fields(request_id = %Uuid::now_v7()))]
    pub async fn refresh(&self, source: &str) -> EngineResult<RateQuote> {
        let slot = self.slot(source)?;
        self.metrics.request();
        Ok(self.fetch_or_fallback(source, slot).await)
    }

    /// [`get_rate`](Self::get_rate) shaped for the outside world.
    pub async fn get_rate_response(&self, source: &str) -> EngineResult<RateResponse> {
        let quote = self.get_rate(source).await?;
        Ok(RateResponse::from(&quote))
    }

    /// Health of every source that has been asked for at least once.
    pub fn health_report(&self) -> HealthReport {
        HealthReport::new(self.health.all_healthy(), self.health.all_statuses())
    }

    pub fn health_status(&self, source: &str) -> Option<HealthStatus> {
        self.health.status(source)
    }

    pub fn circuit_state(&self, source: &str) -> Option<CircuitState> {
        self.sources.get(source).map(|slot| slot.breaker.state())
    }

    /// Force a source's breaker back to closed.
    pub fn reset_circuit(&self, source: &str) -> EngineResult<()> {
        self.slot(source)?.breaker.reset();
        Ok(())
    }

    /// Registered source names, sorted.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn slot(&self, source: &str) -> EngineResult<&SourceSlot> {
        self.sources
            .get(source)
            .ok_or_else(|| EngineError::UnknownSource(source.to_string()))
    }

    async fn fetch_or_fallback(&self, name: &str, slot: &SourceSlot) -> RateQuote {
        match self.fetch_live(name, slot).await {
            Ok(snapshot) => {
                self.cache.store_success(name, snapshot.clone());
                self.metrics.live_fetch();
                RateQuote {
                    source: name.to_string(),
                    kind: slot.source.kind(),
                    snapshot,
                    tier: CacheTier::Success,
                    fallback: false,
                    fallback_reason: None,
                    cache_age_seconds: None,
                    circuit_state: slot.breaker.state(),
                }
            }
            Err(err) => self.fallback(name, slot, &err),
        }
    }

    /// One breaker-guarded, retried fetch. Breaker and health are updated
    /// once for the whole call, not per attempt.
    async fn fetch_live(&self, name: &str, slot: &SourceSlot) -> Result<RateSnapshot, SourceError> {
        if !slot.breaker.can_attempt() {
            self.metrics.circuit_rejection();
            debug!(source = name, "Circuit open, skipping fetch");
            return Err(SourceError::CircuitOpen(name.to_string()));
        }

        let started = Instant::now();
        let result = retry::execute(
            &slot.retry,
            || slot.source.fetch(),
            SourceError::is_retryable,
        )
        .await;
        self.health.record_latency(name, started.elapsed());

        match result {
            Ok(snapshot) => {
                slot.breaker.record_success();
                self.health.record_success(name);
                info!(
                    source = name,
                    rate = snapshot.primary_rate,
                    confidence = snapshot.confidence,
                    "Fetched live rate"
                );
                Ok(snapshot)
            }
            Err(err) => {
                let attempts = err.attempts();
                let err = source_error(err);
                slot.breaker.record_failure();
                self.health.record_failure(name);
                self.metrics.live_failure();
                warn!(
                    source = name,
                    attempts,
                    error = %err,
                    code = err.error_code(),
                    state = slot.breaker.state().as_str(),
                    "Live fetch failed"
                );
                Err(err)
            }
        }
    }

    fn fallback(&self, name: &str, slot: &SourceSlot, err: &SourceError) -> RateQuote {
        let now = self.clock.now();
        let circuit_state = slot.breaker.state();

        if let Some(entry) = self.cache.last_known_good(name) {
            self.metrics.lkg_fallback();
            let age = entry.age_seconds(now);
            info!(source = name, age_secs = age, reason = err.fallback_reason(), "Serving last known good rate");
            return RateQuote {
                source: name.to_string(),
                kind: slot.source.kind(),
                snapshot: entry.snapshot,
                tier: CacheTier::LastKnownGood,
                fallback: true,
                fallback_reason: Some(err.fallback_reason().to_string()),
                cache_age_seconds: Some(age),
                circuit_state,
            };
        }

        self.metrics.static_fallback();
        warn!(source = name, "No cached rate, serving static default");
        RateQuote {
            source: name.to_string(),
            kind: slot.source.kind(),
            snapshot: slot.source.static_default().to_snapshot(now),
            tier: CacheTier::StaticDefault,
            fallback: true,
            fallback_reason: Some(NO_DATA_REASON.to_string()),
            cache_age_seconds: None,
            circuit_state,
        }
    }
}

fn source_error(err: RetryError<SourceError>) -> SourceError {
    match err.into_failure() {
        Failure::Operation(e) => e,
        Failure::Timeout(elapsed) => SourceError::Timeout(elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ratekeeper_common::{defaults, Clock, ManualClock};
    use ratekeeper_sources::MockRateSource;
    use tokio_test::assert_ok;

    struct Harness {
        engine: RateEngine,
        source: Arc<MockRateSource>,
        clock: Arc<ManualClock>,
    }

    fn policy(max_attempts: u32, failure_threshold: u32) -> SourcePolicy {
        let mut policy = SourcePolicy::named("bcv");
        policy.breaker.failure_threshold = failure_threshold;
        policy.retry = RetryPolicy {
            max_attempts,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
            timeout: None,
            jitter: false,
            ..RetryPolicy::default()
        };
        policy
    }

    fn harness(policy: SourcePolicy) -> Harness {
        let clock = ManualClock::starting_now();
        let source = Arc::new(MockRateSource::new(
            "bcv",
            SourceKind::OfficialBulletin,
            defaults::BCV,
        ));
        let engine = RateEngine::with_clock(&EngineConfig::default(), clock.clone())
            .with_source(source.clone(), policy)
            .unwrap();

        Harness {
            engine,
            source,
            clock,
        }
    }

    fn snapshot(clock: &ManualClock, usd: f64) -> RateSnapshot {
        RateSnapshot::new(usd, Some(221.36), clock.now(), "BCV", 0.95)
    }

    #[tokio::test]
    async fn test_cold_failure_serves_static_default() {
        let h = harness(policy(1, 3));

        let quote = assert_ok!(h.engine.get_rate("bcv").await);

        assert_eq!(quote.tier, CacheTier::StaticDefault);
        assert!(quote.fallback);
        assert_eq!(quote.fallback_reason.as_deref(), Some("no data available"));
        assert_eq!(quote.snapshot.primary_rate, defaults::BCV.primary_rate);
        assert_eq!(quote.snapshot.confidence, 0.0);
        assert_eq!(quote.cache_age_seconds, None);
        assert_eq!(h.engine.metrics().static_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_live_success_then_cache_hit() {
        let h = harness(policy(1, 3));
        h.source.respond_with(Ok(snapshot(&h.clock, 189.26)));

        let live = h.engine.get_rate("bcv").await.unwrap();
        assert!(!live.fallback);
        assert_eq!(live.cache_age_seconds, None);

        h.clock.advance(Duration::seconds(10));
        let cached = h.engine.get_rate("bcv").await.unwrap();

        assert_eq!(cached.tier, CacheTier::Success);
        assert!(!cached.fallback);
        assert_eq!(cached.cache_age_seconds, Some(10));
        assert_eq!(cached.snapshot, live.snapshot);
        assert_eq!(h.source.calls(), 1);
        assert_eq!(h.engine.metrics().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_failure_after_ttl_serves_last_known_good() {
        let h = harness(policy(1, 3));
        h.source.push(Ok(snapshot(&h.clock, 189.26)));
        h.engine.get_rate("bcv").await.unwrap();

        h.clock.advance(Duration::seconds(31));
        let quote = h.engine.get_rate("bcv").await.unwrap();

        assert_eq!(quote.tier, CacheTier::LastKnownGood);
        assert!(quote.fallback);
        assert_eq!(quote.fallback_reason.as_deref(), Some("fetch failed"));
        assert_eq!(quote.cache_age_seconds, Some(31));
        assert_eq!(quote.snapshot.primary_rate, 189.26);
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_data_reason() {
        let h = harness(policy(1, 3));
        h.source.push(Ok(snapshot(&h.clock, 189.26)));
        h.source
            .respond_with(Err(SourceError::NoData("layout changed".to_string())));
        h.engine.get_rate("bcv").await.unwrap();

        h.clock.advance(Duration::seconds(31));
        let quote = h.engine.get_rate("bcv").await.unwrap();

        assert_eq!(quote.fallback_reason.as_deref(), Some("no data extracted"));
    }

    #[tokio::test]
    async fn test_open_circuit_skips_fetch() {
        let h = harness(policy(1, 1));
        h.source.push(Ok(snapshot(&h.clock, 189.26)));
        h.engine.get_rate("bcv").await.unwrap();

        h.clock.advance(Duration::seconds(31));
        let failed = h.engine.get_rate("bcv").await.unwrap();
        assert_eq!(failed.circuit_state, CircuitState::Open);

        let rejected = h.engine.get_rate("bcv").await.unwrap();

        assert_eq!(rejected.tier, CacheTier::LastKnownGood);
        assert_eq!(rejected.fallback_reason.as_deref(), Some("circuit open"));
        assert_eq!(rejected.circuit_state, CircuitState::Open);
        assert_eq!(h.source.calls(), 2);
        assert_eq!(h.engine.metrics().circuit_rejections, 1);
        // A rejected request is not an upstream failure.
        assert_eq!(h.engine.health_status("bcv").unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_breaker_counts_calls_not_attempts() {
        let h = harness(policy(3, 3));

        h.engine.get_rate("bcv").await.unwrap();

        assert_eq!(h.source.calls(), 3);
        assert_eq!(h.engine.circuit_state("bcv"), Some(CircuitState::Closed));
        assert_eq!(h.engine.health_status("bcv").unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_transient_failure() {
        let mut p = policy(3, 3);
        p.retry.base_delay = std::time::Duration::from_millis(1000);
        p.retry.max_delay = std::time::Duration::from_millis(10_000);
        let h = harness(p);
        h.source.push(Err(SourceError::http_status(503, "unavailable")));
        h.source.push(Ok(snapshot(&h.clock, 189.26)));

        let quote = h.engine.get_rate("bcv").await.unwrap();

        assert!(!quote.fallback);
        assert_eq!(h.source.calls(), 2);
        let health = h.engine.health_status("bcv").unwrap();
        assert!(health.is_healthy);
        assert_eq!(health.total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_failure_fetches_once() {
        let h = harness(SourcePolicy::named("bcv"));
        h.source
            .respond_with(Err(SourceError::NoData("layout changed".to_string())));
        let started = tokio::time::Instant::now();

        let quote = h.engine.get_rate("bcv").await.unwrap();

        assert_eq!(h.source.calls(), 1);
        assert_eq!(started.elapsed(), std::time::Duration::ZERO);
        assert_eq!(quote.tier, CacheTier::StaticDefault);
        assert_eq!(h.engine.health_status("bcv").unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let h = harness(policy(3, 3));
        h.source
            .respond_with(Err(SourceError::http_status(404, "not found")));

        h.engine.get_rate("bcv").await.unwrap();

        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_cache() {
        let h = harness(policy(1, 3));
        h.source.respond_with(Ok(snapshot(&h.clock, 189.26)));
        h.engine.get_rate("bcv").await.unwrap();

        let quote = h.engine.refresh("bcv").await.unwrap();

        assert!(!quote.fallback);
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let h = harness(policy(1, 3));

        let err = h.engine.get_rate("nope").await.unwrap_err();

        assert!(matches!(err, EngineError::UnknownSource(name) if name == "nope"));
        assert_eq!(h.engine.metrics().requests, 0);
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let h = harness(policy(1, 3));
        let again = Arc::new(MockRateSource::new(
            "bcv",
            SourceKind::OfficialBulletin,
            defaults::BCV,
        ));

        let result = h.engine.with_source(again, policy(1, 3));

        assert!(matches!(result, Err(EngineError::DuplicateSource(_))));
    }

    #[test]
    fn test_source_names_sorted() {
        let p2p = Arc::new(MockRateSource::new("p2p", SourceKind::P2pMarket, defaults::P2P));
        let engine = harness(policy(1, 3))
            .engine
            .with_source(p2p, SourcePolicy::named("p2p"))
            .unwrap();

        assert_eq!(engine.source_names(), vec!["bcv", "p2p"]);
    }

    #[tokio::test]
    async fn test_reset_circuit() {
        let h = harness(policy(1, 1));
        h.engine.get_rate("bcv").await.unwrap();
        assert_eq!(h.engine.circuit_state("bcv"), Some(CircuitState::Open));

        h.engine.reset_circuit("bcv").unwrap();

        assert_eq!(h.engine.circuit_state("bcv"), Some(CircuitState::Closed));
    }

    #[test]
    fn test_from_config_registers_both_sources() {
        let engine = RateEngine::from_config(&EngineConfig::default()).unwrap();
        assert_eq!(engine.source_names(), vec!["bcv", "p2p"]);
    }

    #[test]
    fn test_from_config_validates() {
        let config = EngineConfig {
            unhealthy_after: 0,
            ..EngineConfig::default()
        };

        assert!(matches!(
            RateEngine::from_config(&config),
            Err(EngineError::Config(_))
        ));
    }
}
