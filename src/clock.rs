// =============================================================================
// Clock — wall-clock source for cache freshness and daily usage rollover
// =============================================================================

use chrono::{Local, NaiveDate, Utc};

/// Source of "now". The cache and usage tracker take one of these so their
/// time-dependent behaviour can be driven deterministically.
pub trait Clock: Send + Sync {
    /// Milliseconds since the UNIX epoch.
    fn now_ms(&self) -> i64;

    /// Current calendar date, used for the daily usage reset.
    fn today(&self) -> NaiveDate;
}

/// Real time. The daily rollover follows the local calendar.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
    use std::sync::atomic::{AtomicI64, Ordering};

    use chrono::{DateTime, NaiveDate, Utc};

    use super::Clock;

    /// Hand-driven clock for tests. `today()` is the UTC date of `now_ms()`.
    #[derive(Debug)]
    pub struct ManualClock {
        now_ms: AtomicI64,
    }

    impl ManualClock {
        pub fn new(start_ms: i64) -> Self {
            Self {
                now_ms: AtomicI64::new(start_ms),
            }
        }

        pub fn advance_ms(&self, ms: i64) {
            self.now_ms.fetch_add(ms, Ordering::SeqCst);
        }

        pub fn set_ms(&self, ms: i64) {
            self.now_ms.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.now_ms.load(Ordering::SeqCst)
        }

        fn today(&self) -> NaiveDate {
            DateTime::<Utc>::from_timestamp_millis(self.now_ms())
                .map(|dt| dt.date_naive())
                .unwrap_or_default()
        }
    }
}
