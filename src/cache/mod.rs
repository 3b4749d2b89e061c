pub mod response_cache;
pub mod storage;
pub mod ttl;
pub mod usage;

pub use response_cache::{cache_key, CacheEntry, ResponseCache};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use ttl::{CacheTtlConfig, EndpointCategory};
pub use usage::{UsageStats, UsageTracker};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{MemoryStorage, ResponseCache, UsageTracker};
    use crate::clock::ManualClock;
    use crate::notifications::NotificationLog;

    /// In-memory cache on a manual clock with a 100 request budget.
    pub fn memory_cache(clock: Arc<ManualClock>) -> (Arc<ResponseCache>, Arc<NotificationLog>) {
        let storage = Arc::new(MemoryStorage::new());
        let notes = Arc::new(NotificationLog::new());
        let usage = UsageTracker::new(storage.clone(), clock.clone(), notes.clone(), 100, 0.8);
        let cache = ResponseCache::new(storage, clock, usage, notes.clone(), Duration::from_secs(15));
        (Arc::new(cache), notes)
    }
}
