//! Official bulletin source: scrapes the central bank's home page.

use std::sync::Arc;

use async_trait::async_trait;
use ratekeeper_common::{defaults, now, RateSnapshot, SourceError, SourceKind, SourceResult, StaticRate};
use tracing::{debug, instrument};

use crate::html::HtmlExtractor;
use crate::provider::{PageFetcher, RateSource};

/// Bulletin home page.
pub const DEFAULT_BCV_URL: &str = "https://www.bcv.org.ve";

/// USD (primary) and EUR (secondary) from the bulletin page.
pub struct BcvSource {
    url: String,
    fetcher: Arc<dyn PageFetcher>,
    extractor: HtmlExtractor,
    default: StaticRate,
}

impl BcvSource {
    pub const NAME: &'static str = "bcv";
    const LABEL: &'static str = "BCV";

    pub fn new(url: impl Into<String>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            url: url.into(),
            fetcher,
            extractor: HtmlExtractor::default(),
            default: defaults::BCV,
        }
    }

    pub fn with_extractor(mut self, extractor: HtmlExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_static_default(mut self, default: StaticRate) -> Self {
        self.default = default;
        self
    }

    /// Turn page markup into a snapshot. USD is mandatory.
    pub fn snapshot_from_html(&self, html: &str) -> SourceResult<RateSnapshot> {
        let extraction = self.extractor.extract(html);

        let Some(usd) = extraction.usd else {
            return Err(SourceError::NoData(format!(
                "no USD rate in bulletin page ({} bytes)",
                html.len()
            )));
        };

        debug!(
            usd,
            eur = ?extraction.eur,
            strategy = %extraction.meta.strategy_used,
            "Bulletin rates extracted"
        );
        Ok(RateSnapshot::new(
            usd,
            extraction.eur,
            now(),
            Self::LABEL,
            extraction.meta.confidence,
        ))
    }
}

#[async_trait]
impl RateSource for BcvSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::OfficialBulletin
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> SourceResult<RateSnapshot> {
        let html = self.fetcher.fetch_page(&self.url).await?;
        self.snapshot_from_html(&html)
    }

    fn static_default(&self) -> StaticRate {
        self.default
    }
}
