//! Per-source health tracking.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use ratekeeper_common::{system_clock, SharedClock, Timestamp};

/// Consecutive failures after which a source is reported unhealthy.
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 5;

/// Response times kept per source.
const LATENCY_WINDOW: usize = 100;

/// Health view of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub source_name: String,
    pub is_healthy: bool,
    pub last_success_time: Option<Timestamp>,
    pub last_failure_time: Option<Timestamp>,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Successful requests over all requests, 1.0 before the first request.
    pub success_rate: f64,
    /// Mean of the recent response-time window.
    pub average_response_time: Option<Duration>,
}

#[derive(Debug)]
struct SourceHealth {
    is_healthy: bool,
    last_success_time: Option<Timestamp>,
    last_failure_time: Option<Timestamp>,
    consecutive_failures: u32,
    total_requests: u64,
    total_failures: u64,
    response_times: VecDeque<Duration>,
}

impl SourceHealth {
    fn new() -> Self {
        Self {
            is_healthy: true,
            last_success_time: None,
            last_failure_time: None,
            consecutive_failures: 0,
            total_requests: 0,
            total_failures: 0,
            response_times: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    fn to_status(&self, name: &str) -> HealthStatus {
        let success_rate = if self.total_requests == 0 {
            1.0
        } else {
            (self.total_requests - self.total_failures) as f64 / self.total_requests as f64
        };

        let average_response_time = if self.response_times.is_empty() {
            None
        } else {
            let total: Duration = self.response_times.iter().sum();
            Some(total / self.response_times.len() as u32)
        };

        HealthStatus {
            source_name: name.to_string(),
            is_healthy: self.is_healthy,
            last_success_time: self.last_success_time,
            last_failure_time: self.last_failure_time,
            consecutive_failures: self.consecutive_failures,
            total_requests: self.total_requests,
            total_failures: self.total_failures,
            success_rate,
            average_response_time,
        }
    }
}

/// Registry of source health records, created on first report.
pub struct HealthMonitor {
    sources: DashMap<String, SourceHealth>,
    unhealthy_after: u32,
    clock: SharedClock,
}

impl HealthMonitor {
    /// Create a monitor on the system clock.
    pub fn new(unhealthy_after: u32) -> Self {
        Self::with_clock(unhealthy_after, system_clock())
    }

    /// Create a monitor reading time from `clock`.
    pub fn with_clock(unhealthy_after: u32, clock: SharedClock) -> Self {
        Self {
            sources: DashMap::new(),
            unhealthy_after: unhealthy_after.max(1),
            clock,
        }
    }

    pub fn record_success(&self, name: &str) {
        let now = self.clock.now();
        let mut entry = self
            .sources
            .entry(name.to_string())
            .or_insert_with(SourceHealth::new);

        if !entry.is_healthy {
            info!(source = name, "Source recovered");
        }
        entry.is_healthy = true;
        entry.consecutive_failures = 0;
        entry.last_success_time = Some(now);
        entry.total_requests += 1;
    }

    pub fn record_failure(&self, name: &str) {
        let now = self.clock.now();
        let mut entry = self
            .sources
            .entry(name.to_string())
            .or_insert_with(SourceHealth::new);

        entry.consecutive_failures += 1;
        entry.last_failure_time = Some(now);
        entry.total_requests += 1;
        entry.total_failures += 1;

        if entry.is_healthy && entry.consecutive_failures >= self.unhealthy_after {
            entry.is_healthy = false;
            warn!(
                source = name,
                consecutive_failures = entry.consecutive_failures,
                "Source marked unhealthy"
            );
        }
    }

    /// Record how long one upstream call took. Only the most recent
    /// responses are kept.
    pub fn record_latency(&self, name: &str, elapsed: Duration) {
        let mut entry = self
            .sources
            .entry(name.to_string())
            .or_insert_with(SourceHealth::new);

        if entry.response_times.len() == LATENCY_WINDOW {
            entry.response_times.pop_front();
        }
        entry.response_times.push_back(elapsed);
    }

    /// Status of one source, `None` if it never reported.
    pub fn status(&self, name: &str) -> Option<HealthStatus> {
        self.sources.get(name).map(|h| h.to_status(name))
    }

    /// Statuses of every source, ordered by name.
    pub fn all_statuses(&self) -> BTreeMap<String, HealthStatus> {
        self.sources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_status(entry.key())))
            .collect()
    }

    /// True when at least one source is registered and all of them are
    /// healthy.
    pub fn all_healthy(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|entry| entry.is_healthy)
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_UNHEALTHY_AFTER)
    }
}
