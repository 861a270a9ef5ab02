//! P2P market source: USD/VES from order-book advertisements.

use async_trait::async_trait;
use ratekeeper_common::{defaults, now, RateSnapshot, SourceKind, SourceResult, StaticRate};
use tracing::{debug, instrument};

use crate::orderbook::{AggregatedOrderBookResult, OrderBookAggregator};
use crate::provider::RateSource;

/// Confidence multiplier when the fallback asset had to be used.
const FALLBACK_ASSET_PENALTY: f64 = 0.9;

/// Asset selection and confidence scaling for [`P2pSource`].
#[derive(Debug, Clone)]
pub struct P2pSourceConfig {
    pub target_asset: String,
    pub fallback_asset: String,
    /// Sample count at which confidence reaches 1.0.
    pub full_confidence_samples: usize,
}

impl Default for P2pSourceConfig {
    fn default() -> Self {
        Self {
            target_asset: "USDT".to_string(),
            fallback_asset: "BUSD".to_string(),
            full_confidence_samples: 20,
        }
    }
}

pub struct P2pSource {
    aggregator: OrderBookAggregator,
    config: P2pSourceConfig,
    default: StaticRate,
}

impl P2pSource {
    pub const NAME: &'static str = "p2p";

    pub fn new(aggregator: OrderBookAggregator, config: P2pSourceConfig) -> Self {
        Self {
            aggregator,
            config,
            default: defaults::P2P,
        }
    }

    pub fn with_static_default(mut self, default: StaticRate) -> Self {
        self.default = default;
        self
    }

    fn confidence(&self, result: &AggregatedOrderBookResult) -> f64 {
        let full = self.config.full_confidence_samples.max(1) as f64;
        let coverage = (result.sample_count as f64 / full).min(1.0);
        if result.used_fallback(&self.config.target_asset) {
            coverage * FALLBACK_ASSET_PENALTY
        } else {
            coverage
        }
    }
}

#[async_trait]
impl RateSource for P2pSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::P2pMarket
    }

    #[instrument(skip(self), fields(asset = %self.config.target_asset))]
    async fn fetch(&self) -> SourceResult<RateSnapshot> {
        let result = self
            .aggregator
            .aggregate(&self.config.target_asset, &self.config.fallback_asset)
            .await?;

        let rate = round_cents(result.average_price);
        let confidence = self.confidence(&result);
        debug!(
            rate,
            samples = result.sample_count,
            asset_used = %result.asset_used,
            spread = ?result.spread,
            "P2P rate aggregated"
        );

        Ok(RateSnapshot::new(
            rate,
            None,
            now(),
            format!("Binance P2P ({})", result.asset_used),
            confidence,
        ))
    }

    fn static_default(&self) -> StaticRate {
        self.default
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
