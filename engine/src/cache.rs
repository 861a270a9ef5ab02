//! Two-tier snapshot cache.
//!
//! Every successful fetch is written twice: into the `Success` tier, served
//! while younger than the TTL, and into the `LastKnownGood` tier, which never
//! expires and is only overwritten by the next success.

use chrono::Duration;
use dashmap::DashMap;
use ratekeeper_common::{age_seconds, RateSnapshot, SharedClock, Timestamp};
use serde::Serialize;
use tracing::debug;

/// Where a served snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Success,
    LastKnownGood,
    StaticDefault,
}

/// Cached snapshot entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub snapshot: RateSnapshot,
    pub cached_at: Timestamp,
    pub tier: CacheTier,
}

impl CacheEntry {
    /// Whole seconds since the entry was written.
    pub fn age_seconds(&self, now: Timestamp) -> u64 {
        age_seconds(self.cached_at, now)
    }
}

/// Per-source success and last-known-good entries.
pub struct TieredCache {
    entries: DashMap<(String, CacheTier), CacheEntry>,
    success_ttl: Duration,
    clock: SharedClock,
}

impl TieredCache {
    pub fn with_clock(success_ttl: std::time::Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            success_ttl: Duration::from_std(success_ttl).unwrap_or(Duration::MAX),
            clock,
        }
    }

    /// Success entry if it is still within the TTL.
    pub fn fresh_success(&self, source: &str) -> Option<CacheEntry> {
        let entry = self.get(source, CacheTier::Success)?;
        let age = self.clock.now() - entry.cached_at;

        if age < self.success_ttl {
            debug!(source, age_ms = age.num_milliseconds(), "Cache hit");
            Some(entry)
        } else {
            debug!(source, "Success entry expired");
            None
        }
    }

    /// Most recent successful snapshot, regardless of age.
    pub fn last_known_good(&self, source: &str) -> Option<CacheEntry> {
        self.get(source, CacheTier::LastKnownGood)
    }

    /// Record a successful fetch in both tiers.
    pub fn store_success(&self, source: &str, snapshot: RateSnapshot) {
        let cached_at = self.clock.now();
        for tier in [CacheTier::Success, CacheTier::LastKnownGood] {
            self.entries.insert(
                (source.to_string(), tier),
                CacheEntry {
                    snapshot: snapshot.clone(),
                    cached_at,
                    tier,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut stats = CacheStats::default();

        for entry in self.entries.iter() {
            match entry.tier {
                CacheTier::Success => {
                    stats.success_entries += 1;
                    if now - entry.cached_at < self.success_ttl {
                        stats.fresh_entries += 1;
                    }
                }
                CacheTier::LastKnownGood => stats.last_known_good_entries += 1,
                CacheTier::StaticDefault => {}
            }
        }
        stats
    }

    fn get(&self, source: &str, tier: CacheTier) -> Option<CacheEntry> {
        self.entries
            .get(&(source.to_string(), tier))
            .map(|entry| entry.clone())
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub success_entries: usize,
    pub fresh_entries: usize,
    pub last_known_good_entries: usize,
}
