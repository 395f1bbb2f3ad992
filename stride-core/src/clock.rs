//! Wall-clock abstraction.
//!
//! Cache entries are stamped in epoch milliseconds. Everything that reads
//! the time goes through [`Clock`] so expiry can be driven by hand in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use crate::identity::EpochMs;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> EpochMs;

    /// Current UTC calendar date.
    fn today(&self) -> NaiveDate {
        DateTime::from_timestamp_millis(self.now_ms())
            .unwrap_or(DateTime::UNIX_EPOCH)
            .date_naive()
    }
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMs {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`.
    pub fn new(start_ms: EpochMs) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Create a clock frozen at midnight UTC of the given date.
    pub fn at_date(date: NaiveDate) -> Self {
        let start = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default();
        Self::new(start)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: EpochMs) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMs {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn test_manual_clock_today() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).expect("valid date");
        let clock = ManualClock::at_date(date);
        assert_eq!(clock.today(), date);
        clock.advance(Duration::from_secs(23 * 3600));
        assert_eq!(clock.today(), date);
    }

    #[test]
    fn test_system_clock_is_recent() {
        let now = SystemClock.now_ms();
        // 2020-01-01T00:00:00Z
        assert!(now > 1_577_836_800_000);
    }
}
