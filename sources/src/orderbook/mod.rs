//! Order-book aggregation with asset fallback.

pub mod client;

use std::collections::HashSet;
use std::sync::Arc;

use ratekeeper_common::{SourceError, SourceResult};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::html::RateBounds;

pub use client::{Advertisement, OrderBookClient, P2pClient, P2pClientConfig, TradeSide};

#[cfg(any(test, feature = "test-utils"))]
pub use client::MockOrderBookClient;

/// Samples below which the outlier filter is skipped.
const MIN_SAMPLES_FOR_FILTER: usize = 5;

/// How `spread` is computed from the two side averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadDirection {
    #[default]
    SellMinusBuy,
    BuyMinusSell,
    Absolute,
}

impl SpreadDirection {
    fn apply(&self, sell_avg: f64, buy_avg: f64) -> f64 {
        match self {
            SpreadDirection::SellMinusBuy => sell_avg - buy_avg,
            SpreadDirection::BuyMinusSell => buy_avg - sell_avg,
            SpreadDirection::Absolute => (sell_avg - buy_avg).abs(),
        }
    }
}

/// Price statistics of one side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SideStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
}

impl SideStats {
    fn from_ads(ads: &[Advertisement]) -> Option<Self> {
        if ads.is_empty() {
            return None;
        }
        let (min, max, sum) = ads.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), ad| (min.min(ad.price), max.max(ad.price), sum + ad.price),
        );
        Some(Self {
            min,
            max,
            avg: sum / ads.len() as f64,
            count: ads.len(),
        })
    }
}

/// Result of one aggregation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedOrderBookResult {
    /// Mean of the side averages, or the single non-empty side's mean.
    pub average_price: f64,
    /// Advertisements that went into the averages.
    pub sample_count: usize,
    pub asset_used: String,
    pub sell: Option<SideStats>,
    pub buy: Option<SideStats>,
    /// Only present when both sides have samples.
    pub spread: Option<f64>,
}

impl AggregatedOrderBookResult {
    pub fn used_fallback(&self, target: &str) -> bool {
        self.asset_used != target
    }
}

/// Aggregation settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Advertisements priced outside this range are dropped.
    pub price_bounds: Option<RateBounds>,
    pub spread: SpreadDirection,
    pub filter_outliers: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            price_bounds: None,
            spread: SpreadDirection::default(),
            filter_outliers: true,
        }
    }
}

#[derive(Debug, Default)]
struct Book {
    sell: Vec<Advertisement>,
    buy: Vec<Advertisement>,
}

impl Book {
    fn is_complete(&self) -> bool {
        !self.sell.is_empty() && !self.buy.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.sell.is_empty() && self.buy.is_empty()
    }
}

/// Averages an asset's order book, falling back to a second asset when the
/// first one is thin.
pub struct OrderBookAggregator {
    client: Arc<dyn OrderBookClient>,
    config: AggregatorConfig,
}

impl OrderBookAggregator {
    pub fn new(client: Arc<dyn OrderBookClient>, config: AggregatorConfig) -> Self {
        Self { client, config }
    }

    /// Aggregate `target`, substituting `fallback` for each empty side.
    ///
    /// A side of the target book that came back empty is replaced by the
    /// same side of the fallback book. `asset_used` names the fallback when
    /// any averaged side came from it. Errors from the target propagate,
    /// while a failing fallback is treated as an empty book.
    pub async fn aggregate(
        &self,
        target: &str,
        fallback: &str,
    ) -> SourceResult<AggregatedOrderBookResult> {
        let mut book = self.fetch_book(target).await?;
        let mut asset = target;

        if !book.is_complete() {
            info!(
                target_asset = target,
                fallback_asset = fallback,
                sell = book.sell.len(),
                buy = book.buy.len(),
                "Target asset book incomplete, trying fallback asset"
            );
            let fallback_book = match self.fetch_book(fallback).await {
                Ok(book) => book,
                Err(e) => {
                    warn!(asset = fallback, error = %e, "Fallback asset fetch failed");
                    Book::default()
                }
            };

            if book.sell.is_empty() && !fallback_book.sell.is_empty() {
                book.sell = fallback_book.sell;
                asset = fallback;
            }
            if book.buy.is_empty() && !fallback_book.buy.is_empty() {
                book.buy = fallback_book.buy;
                asset = fallback;
            }
        }

        if book.is_empty() {
            return Err(SourceError::NoLiquidity {
                target: target.to_string(),
                fallback: fallback.to_string(),
            });
        }

        Ok(self.summarize(book, asset))
    }

    async fn fetch_book(&self, asset: &str) -> SourceResult<Book> {
        let (sell, buy) = tokio::join!(
            self.client.fetch_advertisements(asset, TradeSide::Sell),
            self.client.fetch_advertisements(asset, TradeSide::Buy),
        );

        Ok(Book {
            sell: self.clean(sell?),
            buy: self.clean(buy?),
        })
    }

    /// Bounds, duplicates and outliers, in that order.
    fn clean(&self, ads: Vec<Advertisement>) -> Vec<Advertisement> {
        let mut seen = HashSet::new();
        let ads: Vec<Advertisement> = ads
            .into_iter()
            .filter(|ad| self.config.price_bounds.map_or(true, |b| b.contains(ad.price)))
            .filter(|ad| ad.ad_id.is_empty() || seen.insert(ad.ad_id.clone()))
            .collect();

        if self.config.filter_outliers {
            filter_outliers(ads)
        } else {
            ads
        }
    }

    fn summarize(&self, book: Book, asset: &str) -> AggregatedOrderBookResult {
        let sell = SideStats::from_ads(&book.sell);
        let buy = SideStats::from_ads(&book.buy);

        let (average_price, spread) = match (sell, buy) {
            (Some(s), Some(b)) => ((s.avg + b.avg) / 2.0, Some(self.config.spread.apply(s.avg, b.avg))),
            (Some(only), None) | (None, Some(only)) => (only.avg, None),
            (None, None) => (0.0, None),
        };

        let result = AggregatedOrderBookResult {
            average_price,
            sample_count: book.sell.len() + book.buy.len(),
            asset_used: asset.to_string(),
            sell,
            buy,
            spread,
        };
        debug!(
            asset,
            average_price = result.average_price,
            samples = result.sample_count,
            "Order book aggregated"
        );
        result
    }
}

/// Drop interior outliers with a widened IQR fence.
///
/// The lowest and highest `max(2, 10%)` prices are always kept so a thin
/// book is never hollowed out. Nothing is filtered below five samples or
/// when fewer than three interior prices remain.
pub fn filter_outliers(ads: Vec<Advertisement>) -> Vec<Advertisement> {
    if ads.len() < MIN_SAMPLES_FOR_FILTER {
        return ads;
    }

    let mut sorted = ads;
    sorted.sort_by(|a, b| a.price.total_cmp(&b.price));

    let keep = (sorted.len() / 10).max(2);
    if sorted.len() < keep * 2 + 3 {
        return sorted;
    }

    let middle = &sorted[keep..sorted.len() - keep];
    let q1 = middle[middle.len() / 4].price;
    let q3 = middle[middle.len() * 3 / 4].price;
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - 2.5 * iqr, q3 + 2.5 * iqr);

    let mut kept = Vec::with_capacity(sorted.len());
    kept.extend_from_slice(&sorted[..keep]);
    kept.extend(middle.iter().filter(|ad| ad.price >= lower && ad.price <= upper).cloned());
    kept.extend_from_slice(&sorted[sorted.len() - keep..]);
    kept
}
