// =============================================================================
// Central Application State — Market Pulse
// =============================================================================
//
// Ties the subsystems together for the HTTP layer and the background loops.
// Each subsystem manages its own interior mutability; AppState only holds Arc
// references plus a version counter and the start instant.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock around the configuration.
//   - Arc wrappers for cache, market service and chart pipeline.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{FileStorage, MemoryStorage, ResponseCache, Storage, UsageStats, UsageTracker};
use crate::clock::{Clock, SystemClock};
use crate::error::ApiError;
use crate::market::MarketService;
use crate::notifications::NotificationLog;
use crate::pipeline::ChartPipeline;
use crate::polygon::throttle::ThrottleSnapshot;
use crate::polygon::{PolygonClient, RequestThrottler};
use crate::runtime_config::DashboardConfig;

/// Shared state handed to every axum handler and background task.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every mutation made through the API (chart switch,
    /// cache clear, usage reset).
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub config: Arc<RwLock<DashboardConfig>>,

    // ── Subsystems ──────────────────────────────────────────────────────
    pub notifications: Arc<NotificationLog>,
    pub cache: Arc<ResponseCache>,
    pub throttler: Arc<RequestThrottler>,
    pub market: Arc<MarketService>,
    pub pipeline: Arc<ChartPipeline>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

/// Payload of `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: &'static str,
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub api_key_configured: bool,
    pub chart_generation: u64,
    pub notifications: usize,
    pub usage: UsageStats,
    pub daily_budget: u32,
    pub throttle: ThrottleSnapshot,
}

impl AppState {
    /// Build the state with file-backed cache storage and the system clock.
    ///
    /// If the storage directory cannot be opened the cache runs in memory for
    /// the lifetime of the process.
    pub fn new(config: DashboardConfig, api_key: Option<String>) -> Result<Self, ApiError> {
        let storage: Arc<dyn Storage> = match FileStorage::open(
            &config.cache.storage_dir,
            Some(config.cache.storage_quota_bytes),
        ) {
            Ok(store) => {
                info!(dir = %store.dir().display(), "cache storage opened");
                Arc::new(store)
            }
            Err(e) => {
                warn!(
                    dir = %config.cache.storage_dir.display(),
                    error = %e,
                    "cache storage unavailable, caching in memory"
                );
                Arc::new(MemoryStorage::with_quota(config.cache.storage_quota_bytes))
            }
        };

        Self::with_parts(config, api_key, storage, Arc::new(SystemClock))
    }

    /// Build the state over an explicit storage backend and clock.
    pub fn with_parts(
        config: DashboardConfig,
        api_key: Option<String>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ApiError> {
        let notifications = Arc::new(NotificationLog::new());

        let usage = UsageTracker::new(
            storage.clone(),
            clock.clone(),
            notifications.clone(),
            config.usage.daily_budget,
            config.usage.warn_fraction,
        );
        let cache = Arc::new(ResponseCache::new(
            storage,
            clock.clone(),
            usage,
            notifications.clone(),
            config.api.request_timeout(),
        ));

        let throttler = Arc::new(RequestThrottler::new(
            config.api.max_concurrent_requests,
            config.api.min_request_spacing(),
        ));
        let client = PolygonClient::new(api_key, &config.api, throttler.clone())?;

        let market = Arc::new(MarketService::new(
            client,
            cache.clone(),
            config.cache.ttl.clone(),
            config.watchlist.clone(),
            clock.clone(),
        ));
        let pipeline = Arc::new(ChartPipeline::new(
            market.clone(),
            config.chart.clone(),
            clock,
        ));

        Ok(Self {
            state_version: AtomicU64::new(1),
            config: Arc::new(RwLock::new(config)),
            notifications,
            cache,
            throttler,
            market,
            pipeline,
            start_time: std::time::Instant::now(),
        })
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: "ok",
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            api_key_configured: self.market.client().has_api_key(),
            chart_generation: self.pipeline.session().generation(),
            notifications: self.notifications.len(),
            usage: self.cache.usage_stats(),
            daily_budget: self.cache.daily_budget(),
            throttle: self.throttler.snapshot(),
        }
    }
}
