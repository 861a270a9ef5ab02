//! Time utilities and clocks for Ratekeeper.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// A timestamp with timezone (always UTC for Ratekeeper).
pub type Timestamp = DateTime<Utc>;

/// Get the current wall-clock timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Whole seconds elapsed between `earlier` and `later`, clamped at zero.
pub fn age_seconds(earlier: Timestamp, later: Timestamp) -> u64 {
    (later - earlier).num_seconds().max(0) as u64
}

/// Source of "now" for every time-dependent component.
///
/// Breakers, caches and the health monitor read time through this trait so
/// that cooldowns and cache ages can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now()
    }
}

/// Convenience constructor for the default shared clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Create a clock frozen at the current wall-clock time.
    pub fn starting_now() -> Arc<Self> {
        Arc::new(Self::new(now()))
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current = *current + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_seconds_clamps_negative() {
        let t = now();
        assert_eq!(age_seconds(t, t + Duration::seconds(31)), 31);
        assert_eq!(age_seconds(t + Duration::seconds(5), t), 0);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::starting_now();
        let start = clock.now();

        clock.advance(Duration::seconds(90));

        assert_eq!(clock.now() - start, Duration::seconds(90));
    }
}
