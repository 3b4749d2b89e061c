// =============================================================================
// Usage Tracker — daily request accounting against the API budget
// =============================================================================
//
// Every network call that actually leaves the process (cache misses only) is
// recorded per endpoint. Stats are persisted under a single well-known key and
// reset whenever the stored date differs from today's.
//
// Crossing `warn_fraction * daily_budget` logs a warning and notifies the
// user once; while usage stays above the threshold each further request is
// logged at debug level only.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::storage::Storage;
use crate::clock::Clock;
use crate::error::ErrorCategory;
use crate::notifications::NotificationLog;

/// Storage key the stats record lives under.
pub const USAGE_STATS_KEY: &str = "usage_stats";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub daily_requests: u32,
    pub requests_by_endpoint: BTreeMap<String, u32>,
    /// `YYYY-MM-DD` of the day these counters belong to.
    pub last_reset_date: String,
}

impl UsageStats {
    fn empty(date: String) -> Self {
        Self {
            daily_requests: 0,
            requests_by_endpoint: BTreeMap::new(),
            last_reset_date: date,
        }
    }
}

pub struct UsageTracker {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    notifications: Arc<NotificationLog>,
    daily_budget: u32,
    warn_fraction: f64,
    /// Serialises read-modify-write of the stats record.
    update_lock: Mutex<()>,
}

impl UsageTracker {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        notifications: Arc<NotificationLog>,
        daily_budget: u32,
        warn_fraction: f64,
    ) -> Self {
        Self {
            storage,
            clock,
            notifications,
            daily_budget,
            warn_fraction,
            update_lock: Mutex::new(()),
        }
    }

    fn today(&self) -> String {
        self.clock.today().format("%Y-%m-%d").to_string()
    }

    /// Request count at which the budget warning fires.
    pub fn warn_threshold(&self) -> u32 {
        (self.daily_budget as f64 * self.warn_fraction).ceil() as u32
    }

    pub fn daily_budget(&self) -> u32 {
        self.daily_budget
    }

    /// Current stats with the daily rollover applied. Nothing is persisted.
    pub fn stats(&self) -> UsageStats {
        let today = self.today();
        let stored = match self.storage.get_item(USAGE_STATS_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<UsageStats>(&raw)
                .map_err(|e| warn!(error = %e, "stored usage stats unreadable, starting over"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to read usage stats");
                None
            }
        };

        match stored {
            Some(stats) if stats.last_reset_date == today => stats,
            Some(stats) => {
                debug!(
                    previous = %stats.last_reset_date,
                    today = %today,
                    "usage stats rolled over"
                );
                UsageStats::empty(today)
            }
            None => UsageStats::empty(today),
        }
    }

    /// Count one request against `endpoint` and persist the result.
    pub fn record(&self, endpoint: &str) -> UsageStats {
        let _guard = self.update_lock.lock();

        let mut stats = self.stats();
        let prev = stats.daily_requests;
        stats.daily_requests += 1;
        *stats
            .requests_by_endpoint
            .entry(endpoint.to_string())
            .or_insert(0) += 1;

        self.persist(&stats);

        let threshold = self.warn_threshold();
        let used = stats.daily_requests;
        if used >= threshold && prev < threshold {
            warn!(
                used,
                budget = self.daily_budget,
                "API usage crossed warning threshold"
            );
            self.notifications.warning(
                format!("API usage: {used}/{} daily requests used", self.daily_budget),
                Some(ErrorCategory::RateLimit),
            );
        } else if used >= threshold {
            debug!(used, budget = self.daily_budget, "API usage remains above warning threshold");
        }

        stats
    }

    /// Zero all counters, dated today.
    pub fn reset(&self) -> UsageStats {
        let _guard = self.update_lock.lock();
        let stats = UsageStats::empty(self.today());
        self.persist(&stats);
        debug!("usage stats reset");
        stats
    }

    fn persist(&self, stats: &UsageStats) {
        let raw = match serde_json::to_string(stats) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to serialise usage stats");
                return;
            }
        };
        if let Err(e) = self.storage.set_item(USAGE_STATS_KEY, &raw) {
            warn!(error = %e, "failed to persist usage stats");
        }
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("daily_budget", &self.daily_budget)
            .field("warn_fraction", &self.warn_fraction)
            .finish()
    }
}
