//! Rate source traits and the shared HTTP page fetcher.

use std::time::Duration;

use async_trait::async_trait;
use ratekeeper_common::{RateSnapshot, SourceError, SourceKind, SourceResult, StaticRate};
use reqwest::header::{ACCEPT, USER_AGENT};
use tracing::debug;

/// Browser user agent; the bulletin site rejects unknown clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// An upstream that produces rate snapshots.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Source name, used as the cache, breaker and health key.
    fn name(&self) -> &str;

    /// How snapshots of this source are exposed to callers.
    fn kind(&self) -> SourceKind;

    /// Fetch one fresh snapshot. A single attempt; retries happen above.
    async fn fetch(&self) -> SourceResult<RateSnapshot>;

    /// Value served when neither live nor cached data exists.
    fn static_default(&self) -> StaticRate;
}

/// Fetches a page body as text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> SourceResult<String>;
}

/// [`PageFetcher`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPageFetcher {
    /// Build a fetcher with a per-request timeout.
    ///
    /// `accept_invalid_certs` exists for the bulletin site, whose certificate
    /// chain is frequently incomplete.
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| SourceError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> SourceResult<String> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::http_status(
                status.as_u16(),
                format!("GET {url} returned {status}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(e, self.timeout))?;
        debug!(url, bytes = body.len(), "Fetched page");
        Ok(body)
    }
}

/// Map a client error onto the source error taxonomy.
pub(crate) fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> SourceError {
    if err.is_timeout() {
        return SourceError::Timeout(timeout);
    }
    if let Some(status) = err.status() {
        return SourceError::http_status(status.as_u16(), err.to_string());
    }
    if err.is_decode() {
        return SourceError::InvalidResponse(err.to_string());
    }
    SourceError::transport(err.to_string())
}

/// Scripted rate source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    kind: SourceKind,
    default: StaticRate,
    queued: parking_lot::Mutex<std::collections::VecDeque<SourceResult<RateSnapshot>>>,
    standing: parking_lot::Mutex<SourceResult<RateSnapshot>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a mock that fails with a transport error until told otherwise.
    pub fn new(name: impl Into<String>, kind: SourceKind, default: StaticRate) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
            queued: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            standing: parking_lot::Mutex::new(Err(SourceError::transport("mock source offline"))),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Queue a one-shot response, served before the standing one.
    pub fn push(&self, result: SourceResult<RateSnapshot>) {
        self.queued.lock().push_back(result);
    }

    /// Set the response served whenever the queue is empty.
    pub fn respond_with(&self, result: SourceResult<RateSnapshot>) {
        *self.standing.lock() = result;
    }

    /// Number of fetch calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self) -> SourceResult<RateSnapshot> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(result) = self.queued.lock().pop_front() {
            return result;
        }
        self.standing.lock().clone()
    }

    fn static_default(&self) -> StaticRate {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratekeeper_common::{defaults, now};

    #[tokio::test]
    async fn test_mock_source_serves_queue_then_standing() {
        let source = MockRateSource::new("bcv", SourceKind::OfficialBulletin, defaults::BCV);
        let snapshot = RateSnapshot::new(190.0, Some(222.0), now(), "BCV", 0.95);
        source.push(Ok(snapshot.clone()));

        assert_eq!(source.fetch().await.unwrap(), snapshot);
        assert!(source.fetch().await.is_err());

        source.respond_with(Err(SourceError::NoData("empty".into())));
        assert_eq!(
            source.fetch().await.unwrap_err(),
            SourceError::NoData("empty".into())
        );
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn test_http_fetcher_builds() {
        tokio_test::assert_ok!(HttpPageFetcher::new(Duration::from_secs(5), false));
    }
}
