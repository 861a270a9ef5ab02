//! Counters for engine monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Engine metrics.
#[derive(Default)]
pub struct EngineMetrics {
    /// Total `get_rate` calls.
    pub requests: AtomicU64,
    /// Requests answered from the success tier.
    pub cache_hits: AtomicU64,
    /// Live fetches that produced a snapshot.
    pub live_fetches: AtomicU64,
    /// Live fetches that failed after retries.
    pub live_failures: AtomicU64,
    /// Requests answered from the last-known-good tier.
    pub lkg_fallbacks: AtomicU64,
    /// Requests answered with the static default.
    pub static_fallbacks: AtomicU64,
    /// Fetches skipped because the breaker was open.
    pub circuit_rejections: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_fetch(&self) {
        self.live_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_failure(&self) {
        self.live_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lkg_fallback(&self) {
        self.lkg_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn static_fallback(&self) {
        self.static_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            live_fetches: self.live_fetches.load(Ordering::Relaxed),
            live_failures: self.live_failures.load(Ordering::Relaxed),
            lkg_fallbacks: self.lkg_fallbacks.load(Ordering::Relaxed),
            static_fallbacks: self.static_fallbacks.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub live_fetches: u64,
    pub live_failures: u64,
    pub lkg_fallbacks: u64,
    pub static_fallbacks: u64,
    pub circuit_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = EngineMetrics::new();
        metrics.request();
        metrics.request();
        metrics.cache_hit();
        metrics.live_failure();
        metrics.static_fallback();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                requests: 2,
                cache_hits: 1,
                live_failures: 1,
                static_fallbacks: 1,
                ..MetricsSnapshot::default()
            }
        );
    }
}
