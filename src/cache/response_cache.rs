// =============================================================================
// Response Cache — TTL freshness, stale fallback and usage accounting
// =============================================================================
//
// Per key the cache moves Empty -> Fresh -> Stale -> Fresh (every successful
// write re-enters Fresh). Entries are never expired on read; `get` always
// returns whatever is stored and the caller decides freshness from
// `timestamp` and `ttl`.
//
// `cached_fetch` serves fresh entries without touching the network. On a miss
// or stale entry it runs the network call under the configured timeout; a
// success is recorded against the daily budget and written back, a failure
// falls back to any stored entry, however old. Only when nothing is stored
// does the error reach the caller.
//
// Writes replace whole entries. On a quota failure old entries (older than
// twice their own ttl) are evicted and the write retried once; if that fails
// too the entry is dropped with a warning. The cache is an optimisation, so
// storage failures never fail a request.
// =============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::storage::Storage;
use super::usage::{UsageStats, UsageTracker};
use crate::clock::Clock;
use crate::error::{ApiError, StorageError};
use crate::notifications::NotificationLog;

/// Prefix of every cache entry key in storage.
pub const CACHE_PREFIX: &str = "cache:";

/// A stored response. `timestamp` is epoch milliseconds, `ttl` milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
    pub ttl: u64,
}

impl<T> CacheEntry<T> {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp
    }

    pub fn is_fresh_at(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms) < self.ttl as i64
    }
}

/// Just the bookkeeping fields, for eviction without decoding `data`.
#[derive(Deserialize)]
struct EntryMeta {
    timestamp: i64,
    ttl: u64,
}

/// Normalised cache key: parameters sorted by name, absent values dropped,
/// appended as a query string. No `?` when no parameters remain.
pub fn cache_key(url: &str, params: &[(&str, Option<String>)]) -> String {
    let mut present: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| (*k, v)))
        .collect();
    present.sort_by(|a, b| a.0.cmp(b.0));

    if present.is_empty() {
        return url.to_string();
    }

    let query: Vec<String> = present.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{url}?{}", query.join("&"))
}

/// The endpoint a key is accounted under: its path, without the query.
pub fn endpoint_of(key: &str) -> &str {
    key.split_once('?').map_or(key, |(path, _)| path)
}

pub struct ResponseCache {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    usage: UsageTracker,
    notifications: Arc<NotificationLog>,
    request_timeout: Duration,
}

impl ResponseCache {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        usage: UsageTracker,
        notifications: Arc<NotificationLog>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            clock,
            usage,
            notifications,
            request_timeout,
        }
    }

    fn storage_key(key: &str) -> String {
        format!("{CACHE_PREFIX}{key}")
    }

    // -------------------------------------------------------------------------
    // Entry access
    // -------------------------------------------------------------------------

    /// The stored entry for `key`, fresh or not. `None` if never written (or
    /// unreadable).
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = match self.storage.get_item(&Self::storage_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(key, error = %e, "cache entry unreadable");
                None
            }
        }
    }

    pub fn is_fresh<T>(&self, entry: &CacheEntry<T>) -> bool {
        entry.is_fresh_at(self.clock.now_ms())
    }

    /// Store `data` under `key`, replacing any previous entry.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) {
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_ms(),
            ttl: ttl.as_millis() as u64,
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache entry could not be serialised");
                return;
            }
        };

        let storage_key = Self::storage_key(key);
        match self.storage.set_item(&storage_key, &raw) {
            Ok(()) => {}
            Err(StorageError::QuotaExceeded { needed, quota }) => {
                debug!(key, needed, quota, "cache quota hit, evicting old entries");
                self.evict_old();
                if let Err(e) = self.storage.set_item(&storage_key, &raw) {
                    warn!(key, error = %e, "cache write failed after eviction, entry dropped");
                }
            }
            Err(e) => warn!(key, error = %e, "cache write failed, entry dropped"),
        }
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Remove entries older than twice their own ttl, plus any that cannot be
    /// parsed. Returns how many were removed.
    pub fn evict_old(&self) -> usize {
        let now = self.clock.now_ms();
        let mut cleared = 0;

        for key in self.cache_keys() {
            let expired = match self.storage.get_item(&key) {
                Ok(Some(raw)) => match serde_json::from_str::<EntryMeta>(&raw) {
                    Ok(meta) => now - meta.timestamp > 2 * meta.ttl as i64,
                    Err(_) => true,
                },
                Ok(None) => false,
                Err(_) => true,
            };

            if expired {
                match self.storage.remove_item(&key) {
                    Ok(()) => cleared += 1,
                    Err(e) => warn!(key = %key, error = %e, "failed to evict cache entry"),
                }
            }
        }

        info!(cleared, "old cache entries evicted");
        cleared
    }

    /// Remove every cache entry. Usage stats are kept.
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        for key in self.cache_keys() {
            match self.storage.remove_item(&key) {
                Ok(()) => cleared += 1,
                Err(e) => warn!(key = %key, error = %e, "failed to remove cache entry"),
            }
        }

        info!(cleared, "API cache cleared");
        self.notifications.info("API cache cleared");
        cleared
    }

    fn cache_keys(&self) -> Vec<String> {
        match self.storage.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(CACHE_PREFIX))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list cache keys");
                Vec::new()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Fetch-through
    // -------------------------------------------------------------------------

    /// Serve `key` from cache while fresh, otherwise call `network_fn`.
    /// Failures fall back to the stored entry regardless of age.
    pub async fn cached_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        network_fn: F,
    ) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let cached = match self.get::<T>(key) {
            Some(entry) if self.is_fresh(&entry) => {
                debug!(key, "cache hit");
                return Ok(entry.data);
            }
            other => other,
        };

        let result = match tokio::time::timeout(self.request_timeout, network_fn()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        };

        match result {
            Ok(data) => {
                self.usage.record(endpoint_of(key));
                self.set(key, &data, ttl);
                debug!(key, "cache refreshed from network");
                Ok(data)
            }
            Err(e) => match cached {
                Some(entry) => {
                    warn!(
                        key,
                        error = %e,
                        age_ms = entry.age_ms(self.clock.now_ms()),
                        "network fetch failed, serving stale cache entry"
                    );
                    self.notifications.api_failure(endpoint_of(key), &e, true);
                    Ok(entry.data)
                }
                None => {
                    warn!(key, error = %e, "network fetch failed with no cached fallback");
                    self.notifications.api_failure(endpoint_of(key), &e, false);
                    Err(e)
                }
            },
        }
    }

    // -------------------------------------------------------------------------
    // Usage
    // -------------------------------------------------------------------------

    pub fn usage_stats(&self) -> UsageStats {
        self.usage.stats()
    }

    pub fn reset_usage_stats(&self) -> UsageStats {
        self.usage.reset()
    }

    pub fn daily_budget(&self) -> u32 {
        self.usage.daily_budget()
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("usage", &self.usage)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
