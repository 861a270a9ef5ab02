//! Rate snapshots produced by upstream sources.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// An immutable reading of one upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    /// Headline rate (USD for the bulletin, USD/VES for the P2P market).
    pub primary_rate: f64,
    /// Secondary rate when the source publishes one (EUR for the bulletin).
    pub secondary_rate: Option<f64>,
    /// When the reading was taken.
    pub timestamp: Timestamp,
    /// Human-readable provenance label.
    pub source: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

impl RateSnapshot {
    /// Create a new snapshot. Confidence is clamped to [0, 1].
    pub fn new(
        primary_rate: f64,
        secondary_rate: Option<f64>,
        timestamp: Timestamp,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            primary_rate,
            secondary_rate,
            timestamp,
            source: source.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// What kind of upstream a source is; decides how a snapshot is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Official bulletin page: primary = USD, secondary = EUR.
    OfficialBulletin,
    /// P2P order book: primary = USD/VES.
    P2pMarket,
}

/// A compile-time static default for a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticRate {
    pub primary_rate: f64,
    pub secondary_rate: Option<f64>,
    pub source: &'static str,
}

impl StaticRate {
    /// Materialise the static default as a snapshot stamped at `at`.
    pub fn to_snapshot(&self, at: Timestamp) -> RateSnapshot {
        RateSnapshot::new(self.primary_rate, self.secondary_rate, at, self.source, 0.0)
    }
}

/// Static defaults served when no live or cached data exists.
pub mod defaults {
    use super::StaticRate;

    pub const BCV: StaticRate = StaticRate {
        primary_rate: 189.0,
        secondary_rate: Some(221.0),
        source: "BCV (fallback - static)",
    };

    pub const P2P: StaticRate = StaticRate {
        primary_rate: 228.5,
        secondary_rate: None,
        source: "Binance P2P (fallback - static)",
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now;

    #[test]
    fn test_confidence_is_clamped() {
        let snapshot = RateSnapshot::new(1.0, None, now(), "TEST", 1.7);
        assert_eq!(snapshot.confidence, 1.0);

        let snapshot = RateSnapshot::new(1.0, None, now(), "TEST", -0.2);
        assert_eq!(snapshot.confidence, 0.0);
    }

    #[test]
    fn test_static_default_snapshot() {
        let at = now();
        let snapshot = defaults::BCV.to_snapshot(at);

        assert_eq!(snapshot.primary_rate, 189.0);
        assert_eq!(snapshot.secondary_rate, Some(221.0));
        assert_eq!(snapshot.timestamp, at);
        assert_eq!(snapshot.confidence, 0.0);
    }
}
