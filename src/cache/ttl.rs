// =============================================================================
// TTL table — freshness window per logical endpoint category
// =============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Logical endpoint families with distinct update cadences. Callers name the
/// category explicitly: the snapshot path serves indices, sectors and the
/// watchlist, so a path alone does not determine freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointCategory {
    MarketStatus,
    MarketIndices,
    SectorPerformance,
    Watchlist,
    Aggregates,
    Technicals,
    Screener,
    MarketBreadth,
}

fn default_market_status_secs() -> u64 {
    5 * 60
}

fn default_market_indices_secs() -> u64 {
    2 * 60
}

fn default_sector_performance_secs() -> u64 {
    15 * 60
}

fn default_watchlist_secs() -> u64 {
    60
}

fn default_aggregates_secs() -> u64 {
    10 * 60
}

fn default_technicals_secs() -> u64 {
    30 * 60
}

fn default_screener_secs() -> u64 {
    60 * 60
}

fn default_market_breadth_secs() -> u64 {
    20 * 60
}

/// TTL per category, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_market_status_secs")]
    pub market_status_secs: u64,
    #[serde(default = "default_market_indices_secs")]
    pub market_indices_secs: u64,
    #[serde(default = "default_sector_performance_secs")]
    pub sector_performance_secs: u64,
    #[serde(default = "default_watchlist_secs")]
    pub watchlist_secs: u64,
    #[serde(default = "default_aggregates_secs")]
    pub aggregates_secs: u64,
    #[serde(default = "default_technicals_secs")]
    pub technicals_secs: u64,
    #[serde(default = "default_screener_secs")]
    pub screener_secs: u64,
    #[serde(default = "default_market_breadth_secs")]
    pub market_breadth_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            market_status_secs: default_market_status_secs(),
            market_indices_secs: default_market_indices_secs(),
            sector_performance_secs: default_sector_performance_secs(),
            watchlist_secs: default_watchlist_secs(),
            aggregates_secs: default_aggregates_secs(),
            technicals_secs: default_technicals_secs(),
            screener_secs: default_screener_secs(),
            market_breadth_secs: default_market_breadth_secs(),
        }
    }
}

impl CacheTtlConfig {
    pub fn ttl(&self, category: EndpointCategory) -> Duration {
        let secs = match category {
            EndpointCategory::MarketStatus => self.market_status_secs,
            EndpointCategory::MarketIndices => self.market_indices_secs,
            EndpointCategory::SectorPerformance => self.sector_performance_secs,
            EndpointCategory::Watchlist => self.watchlist_secs,
            EndpointCategory::Aggregates => self.aggregates_secs,
            EndpointCategory::Technicals => self.technicals_secs,
            EndpointCategory::Screener => self.screener_secs,
            EndpointCategory::MarketBreadth => self.market_breadth_secs,
        };
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let cfg = CacheTtlConfig::default();
        assert_eq!(cfg.ttl(EndpointCategory::Watchlist), Duration::from_secs(60));
        assert_eq!(cfg.ttl(EndpointCategory::Screener), Duration::from_secs(3600));
        assert_eq!(cfg.ttl(EndpointCategory::MarketStatus), Duration::from_secs(300));
        assert_eq!(cfg.ttl(EndpointCategory::SectorPerformance), Duration::from_secs(900));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: CacheTtlConfig = serde_json::from_str(r#"{ "watchlist_secs": 5 }"#).unwrap();
        assert_eq!(cfg.watchlist_secs, 5);
        assert_eq!(cfg.aggregates_secs, 600);
    }
}
