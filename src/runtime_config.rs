// =============================================================================
// Dashboard Configuration — persisted settings with atomic save
// =============================================================================
//
// Every tunable of the service lives here: API client behaviour, the daily
// request budget, cache TTLs and storage limits, chart defaults and the
// default watchlist. Secrets (the API key) never live in this file; they come
// from the environment.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::CacheTtlConfig;
use crate::indicators::{IndicatorSet, IndicatorSettings};
use crate::optimizer::DEFAULT_MAX_POINTS;
use crate::volume_profile::{DEFAULT_BUCKETS, DEFAULT_SIGNIFICANCE};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_base_url() -> String {
    "https://api.polygon.io".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_min_request_spacing_ms() -> u64 {
    200
}

fn default_max_concurrent_requests() -> usize {
    1
}

fn default_daily_budget() -> u32 {
    100
}

fn default_warn_fraction() -> f64 {
    0.8
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("cache_store")
}

fn default_storage_quota_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_max_points() -> usize {
    DEFAULT_MAX_POINTS
}

fn default_volume_buckets() -> usize {
    DEFAULT_BUCKETS
}

fn default_significant_threshold() -> f64 {
    DEFAULT_SIGNIFICANCE
}

fn default_indicators() -> IndicatorSet {
    IndicatorSet::all()
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_watchlist() -> Vec<String> {
    ["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// =============================================================================
// Sections
// =============================================================================

/// Market-data API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout, applied both by the HTTP client and around every
    /// cached fetch.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum gap between the starts of two consecutive requests.
    #[serde(default = "default_min_request_spacing_ms")]
    pub min_request_spacing_ms: u64,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            min_request_spacing_ms: default_min_request_spacing_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_request_spacing(&self) -> Duration {
        Duration::from_millis(self.min_request_spacing_ms)
    }
}

/// Daily request budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSettings {
    #[serde(default = "default_daily_budget")]
    pub daily_budget: u32,

    /// Fraction of the budget at which the user is warned (0.8 = 80 %).
    #[serde(default = "default_warn_fraction")]
    pub warn_fraction: f64,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            daily_budget: default_daily_budget(),
            warn_fraction: default_warn_fraction(),
        }
    }
}

/// Response cache storage and freshness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Directory for the file-backed store.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_storage_quota_bytes")]
    pub storage_quota_bytes: u64,

    #[serde(default)]
    pub ttl: CacheTtlConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            storage_quota_bytes: default_storage_quota_bytes(),
            ttl: CacheTtlConfig::default(),
        }
    }
}

/// Chart pipeline defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSettings {
    /// Upper bound on points fed to the indicator engine.
    #[serde(default = "default_max_points")]
    pub max_points: usize,

    #[serde(default = "default_volume_buckets")]
    pub volume_buckets: usize,

    #[serde(default = "default_significant_threshold")]
    pub significant_threshold: f64,

    /// Indicators computed when a request does not name any.
    #[serde(default = "default_indicators")]
    pub default_indicators: IndicatorSet,

    #[serde(default)]
    pub indicator_settings: IndicatorSettings,

    /// How often the current chart is reloaded in the background.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            max_points: default_max_points(),
            volume_buckets: default_volume_buckets(),
            significant_threshold: default_significant_threshold(),
            default_indicators: default_indicators(),
            indicator_settings: IndicatorSettings::default(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

// =============================================================================
// DashboardConfig
// =============================================================================

/// Top-level configuration. Every field has a serde default so that older
/// JSON files missing new fields still deserialise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub usage: UsageSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub chart: ChartSettings,

    /// Symbols shown when the caller does not supply a watchlist.
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            usage: UsageSettings::default(),
            cache: CacheSettings::default(),
            chart: ChartSettings::default(),
            watchlist: default_watchlist(),
        }
    }
}

impl DashboardConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dashboard config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse dashboard config from {}", path.display()))?;

        info!(
            path = %path.display(),
            watchlist = ?config.watchlist,
            daily_budget = config.usage.daily_budget,
            "dashboard config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise dashboard config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "dashboard config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EndpointCategory;
    use crate::indicators::IndicatorKind;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = DashboardConfig::default();
        assert_eq!(cfg.api.base_url, "https://api.polygon.io");
        assert_eq!(cfg.api.request_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.api.min_request_spacing(), Duration::from_millis(200));
        assert_eq!(cfg.api.max_concurrent_requests, 1);
        assert_eq!(cfg.usage.daily_budget, 100);
        assert!((cfg.usage.warn_fraction - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.cache.storage_quota_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.chart.max_points, 500);
        assert_eq!(cfg.chart.volume_buckets, 20);
        assert!(cfg.chart.default_indicators.contains(IndicatorKind::Macd));
        assert_eq!(cfg.watchlist, vec!["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA"]);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: DashboardConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.usage.daily_budget, 100);
        assert_eq!(
            cfg.cache.ttl.ttl(EndpointCategory::Aggregates),
            Duration::from_secs(600)
        );
        assert_eq!(cfg.chart.indicator_settings.rsi_period, 14);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "usage": { "daily_budget": 5000 },
            "chart": { "max_points": 300, "default_indicators": ["sma", "rsi"] },
            "watchlist": ["TSLA"]
        }"#;
        let cfg: DashboardConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.usage.daily_budget, 5000);
        assert!((cfg.usage.warn_fraction - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.chart.max_points, 300);
        assert_eq!(cfg.chart.volume_buckets, 20);
        assert!(cfg.chart.default_indicators.contains(IndicatorKind::Rsi));
        assert!(!cfg.chart.default_indicators.contains(IndicatorKind::Ema));
        assert_eq!(cfg.watchlist, vec!["TSLA"]);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard_config.json");

        let mut cfg = DashboardConfig::default();
        cfg.watchlist = vec!["META".into()];
        cfg.chart.refresh_interval_secs = 15;
        cfg.save(&path).unwrap();

        let loaded = DashboardConfig::load(&path).unwrap();
        assert_eq!(loaded.watchlist, vec!["META"]);
        assert_eq!(loaded.chart.refresh_interval_secs, 15);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DashboardConfig::load(dir.path().join("missing.json")).is_err());
    }
}
