//! Outward-facing response shapes.

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use ratekeeper_common::{SourceKind, Timestamp};
use ratekeeper_resilience::{CircuitState, HealthStatus};
use serde::Serialize;

use crate::cache::CacheTier;
use crate::engine::RateQuote;

fn rfc3339(at: Timestamp) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Rate values keyed the way each source kind publishes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eur: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_ves: Option<f64>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
    pub source: String,
}

/// Serialized answer to a rate request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateResponse {
    /// False only when the static default is served.
    pub success: bool,
    pub data: RateData,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age: Option<u64>,
    pub circuit_breaker_state: CircuitState,
}

impl From<&RateQuote> for RateResponse {
    fn from(quote: &RateQuote) -> Self {
        let snapshot = &quote.snapshot;
        let (usd, eur, usd_ves) = match quote.kind {
            SourceKind::OfficialBulletin => {
                (Some(snapshot.primary_rate), snapshot.secondary_rate, None)
            }
            SourceKind::P2pMarket => (None, None, Some(snapshot.primary_rate)),
        };

        Self {
            success: quote.tier != CacheTier::StaticDefault,
            data: RateData {
                usd,
                eur,
                usd_ves,
                last_updated: rfc3339(snapshot.timestamp),
                source: snapshot.source.clone(),
            },
            fallback: quote.fallback,
            fallback_reason: quote.fallback_reason.clone(),
            cache_age: quote.cache_age_seconds,
            circuit_breaker_state: quote.circuit_state,
        }
    }
}

/// One source's entry in the health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScraperHealth {
    pub is_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<String>,
    pub consecutive_failures: u32,
}

impl From<&HealthStatus> for ScraperHealth {
    fn from(status: &HealthStatus) -> Self {
        Self {
            is_healthy: status.is_healthy,
            last_success_time: status.last_success_time.map(rfc3339),
            last_failure_time: status.last_failure_time.map(rfc3339),
            consecutive_failures: status.consecutive_failures,
        }
    }
}

/// Aggregate health of every tracked source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub scraper_count: usize,
    pub scrapers: BTreeMap<String, ScraperHealth>,
}

impl HealthReport {
    pub fn new(healthy: bool, statuses: BTreeMap<String, HealthStatus>) -> Self {
        let scrapers: BTreeMap<String, ScraperHealth> = statuses
            .iter()
            .map(|(name, status)| (name.clone(), ScraperHealth::from(status)))
            .collect();

        Self {
            healthy,
            scraper_count: scrapers.len(),
            scrapers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ratekeeper_common::RateSnapshot;
    use serde_json::json;

    fn at() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 13, 30, 0).unwrap()
    }

    fn quote(kind: SourceKind, tier: CacheTier) -> RateQuote {
        RateQuote {
            source: "bcv".to_string(),
            kind,
            snapshot: RateSnapshot::new(189.26, Some(221.36), at(), "BCV", 0.95),
            tier,
            fallback: tier != CacheTier::Success,
            fallback_reason: (tier != CacheTier::Success).then(|| "fetch failed".to_string()),
            cache_age_seconds: (tier == CacheTier::LastKnownGood).then_some(31),
            circuit_state: CircuitState::HalfOpen,
        }
    }

    #[test]
    fn test_bulletin_response_shape() {
        let response = RateResponse::from(&quote(SourceKind::OfficialBulletin, CacheTier::Success));

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "success": true,
                "data": {
                    "usd": 189.26,
                    "eur": 221.36,
                    "lastUpdated": "2024-03-01T13:30:00.000Z",
                    "source": "BCV"
                },
                "fallback": false,
                "circuitBreakerState": "half_open"
            })
        );
    }

    #[test]
    fn test_p2p_response_uses_usd_ves() {
        let response =
            RateResponse::from(&quote(SourceKind::P2pMarket, CacheTier::LastKnownGood));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["data"]["usd_ves"], json!(189.26));
        assert!(json["data"].get("usd").is_none());
        assert!(json["data"].get("eur").is_none());
        assert_eq!(json["success"], json!(true));
        assert_eq!(json["fallback"], json!(true));
        assert_eq!(json["fallbackReason"], json!("fetch failed"));
        assert_eq!(json["cacheAge"], json!(31));
    }

    #[test]
    fn test_static_default_is_not_success() {
        let response =
            RateResponse::from(&quote(SourceKind::OfficialBulletin, CacheTier::StaticDefault));
        assert!(!response.success);
        assert!(response.fallback);
    }

    #[test]
    fn test_health_report_shape() {
        let mut statuses = BTreeMap::new();
        statuses.insert(
            "bcv".to_string(),
            HealthStatus {
                source_name: "bcv".to_string(),
                is_healthy: false,
                last_success_time: None,
                last_failure_time: Some(at()),
                consecutive_failures: 5,
                total_requests: 5,
                total_failures: 5,
                success_rate: 0.0,
                average_response_time: None,
            },
        );

        let report = HealthReport::new(false, statuses);

        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "healthy": false,
                "scraperCount": 1,
                "scrapers": {
                    "bcv": {
                        "isHealthy": false,
                        "lastFailureTime": "2024-03-01T13:30:00.000Z",
                        "consecutiveFailures": 5
                    }
                }
            })
        );
    }

    #[test]
    fn test_empty_health_report() {
        let report = HealthReport::new(false, BTreeMap::new());
        assert_eq!(report.scraper_count, 0);
        assert!(!report.healthy);
    }
}
