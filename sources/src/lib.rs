//! Ratekeeper Sources
//!
//! The two upstreams the engine reads from, behind the [`RateSource`] trait:
//!
//! - [`BcvSource`]: the official bulletin page, parsed by the
//!   multi-strategy [`HtmlExtractor`]
//! - [`P2pSource`]: the P2P order book, averaged by the
//!   [`OrderBookAggregator`] with asset fallback
//!
//! Sources perform a single attempt per `fetch`. Retries, circuit breaking and
//! caching live in the engine.

pub mod bcv;
pub mod html;
pub mod orderbook;
pub mod p2p;
pub mod provider;

pub use bcv::{BcvSource, DEFAULT_BCV_URL};
pub use html::{Extraction, ExtractionCandidate, ExtractionStrategy, HtmlExtractor, RateBounds};
pub use orderbook::{
    AggregatedOrderBookResult, AggregatorConfig, OrderBookAggregator, OrderBookClient, P2pClient,
    P2pClientConfig, SpreadDirection,
};
pub use p2p::{P2pSource, P2pSourceConfig};
pub use provider::{HttpPageFetcher, PageFetcher, RateSource};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateSource;
