//! P2P order-book API client.

use std::time::Duration;

use async_trait::async_trait;
use ratekeeper_common::{SourceError, SourceResult};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::provider::{classify_reqwest_error, BROWSER_USER_AGENT};

/// Public P2P advertisement search endpoint.
pub const DEFAULT_P2P_ENDPOINT: &str = "https://p2p.binance.com/bapi/c2c/v2/friendly/c2c/adv/search";

/// Which side of the book to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeSide {
    Sell,
    Buy,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Sell => "SELL",
            TradeSide::Buy => "BUY",
        }
    }
}

/// One advertisement's unit price.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub price: f64,
    pub ad_id: String,
}

impl Advertisement {
    pub fn new(price: f64, ad_id: impl Into<String>) -> Self {
        Self {
            price,
            ad_id: ad_id.into(),
        }
    }
}

/// Lists advertisements for an asset against the configured fiat.
#[async_trait]
pub trait OrderBookClient: Send + Sync {
    async fn fetch_advertisements(
        &self,
        asset: &str,
        side: TradeSide,
    ) -> SourceResult<Vec<Advertisement>>;
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct P2pClientConfig {
    pub endpoint: String,
    pub fiat: String,
    pub pages: u32,
    pub rows_per_page: u32,
    /// Pause between consecutive pages.
    pub page_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for P2pClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_P2P_ENDPOINT.to_string(),
            fiat: "VES".to_string(),
            pages: 2,
            rows_per_page: 20,
            page_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    page: u32,
    rows: u32,
    pay_types: Vec<String>,
    countries: Vec<String>,
    publisher_type: Option<String>,
    asset: &'a str,
    fiat: &'a str,
    trade_type: &'static str,
    pro_merchant_ads: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<SearchEntry>>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    #[serde(default)]
    adv: Option<AdvDetails>,
}

#[derive(Debug, Deserialize)]
struct AdvDetails {
    #[serde(default)]
    price: Option<String>,
    #[serde(default, rename = "advNo")]
    adv_no: Option<String>,
}

/// Extract advertisements from a search response body. Entries without a
/// usable price are skipped.
fn parse_search_response(body: &str) -> SourceResult<Vec<Advertisement>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::InvalidResponse(format!("order book response: {e}")))?;

    Ok(response
        .data
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| entry.adv)
        .filter_map(|adv| {
            let price = adv.price?.trim().parse::<f64>().ok()?;
            (price.is_finite() && price > 0.0)
                .then(|| Advertisement::new(price, adv.adv_no.unwrap_or_default()))
        })
        .collect())
}

/// [`OrderBookClient`] over the public P2P search API.
pub struct P2pClient {
    client: reqwest::Client,
    config: P2pClientConfig,
}

impl P2pClient {
    pub fn new(config: P2pClientConfig) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn fetch_page(
        &self,
        asset: &str,
        side: TradeSide,
        page: u32,
    ) -> SourceResult<Vec<Advertisement>> {
        let request = SearchRequest {
            page,
            rows: self.config.rows_per_page,
            pay_types: Vec::new(),
            countries: Vec::new(),
            publisher_type: None,
            asset,
            fiat: &self.config.fiat,
            trade_type: side.as_str(),
            pro_merchant_ads: false,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, self.config.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::http_status(
                status.as_u16(),
                format!("order book search returned {status}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(e, self.config.request_timeout))?;
        parse_search_response(&body)
    }
}

#[async_trait]
impl OrderBookClient for P2pClient {
    /// Fetch every configured page. A rate-limit answer aborts the whole
    /// side; other page failures are skipped and only surface when no page
    /// produced anything.
    async fn fetch_advertisements(
        &self,
        asset: &str,
        side: TradeSide,
    ) -> SourceResult<Vec<Advertisement>> {
        let mut ads = Vec::new();
        let mut last_error = None;

        for page in 1..=self.config.pages.max(1) {
            match self.fetch_page(asset, side, page).await {
                Ok(mut batch) => {
                    debug!(asset, side = side.as_str(), page, count = batch.len(), "Fetched order book page");
                    ads.append(&mut batch);
                }
                Err(SourceError::RateLimited) => return Err(SourceError::RateLimited),
                Err(e) => {
                    warn!(asset, side = side.as_str(), page, error = %e, "Order book page failed");
                    last_error = Some(e);
                }
            }

            if page < self.config.pages && !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        match last_error {
            Some(e) if ads.is_empty() => Err(e),
            _ => Ok(ads),
        }
    }
}

/// Canned order book for testing.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MockOrderBookClient {
    books: parking_lot::Mutex<
        std::collections::HashMap<(String, TradeSide), SourceResult<Vec<Advertisement>>>,
    >,
    requests: parking_lot::Mutex<Vec<(String, TradeSide)>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockOrderBookClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one side of one asset's book from bare prices.
    pub fn set_prices(&self, asset: &str, side: TradeSide, prices: &[f64]) {
        let ads = prices
            .iter()
            .enumerate()
            .map(|(i, p)| Advertisement::new(*p, format!("{asset}-{}-{i}", side.as_str())))
            .collect();
        self.books.lock().insert((asset.to_string(), side), Ok(ads));
    }

    pub fn set_result(&self, asset: &str, side: TradeSide, result: SourceResult<Vec<Advertisement>>) {
        self.books.lock().insert((asset.to_string(), side), result);
    }

    /// Every `(asset, side)` requested so far, in order.
    pub fn requests(&self) -> Vec<(String, TradeSide)> {
        self.requests.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl OrderBookClient for MockOrderBookClient {
    async fn fetch_advertisements(
        &self,
        asset: &str,
        side: TradeSide,
    ) -> SourceResult<Vec<Advertisement>> {
        self.requests.lock().push((asset.to_string(), side));
        self.books
            .lock()
            .get(&(asset.to_string(), side))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
