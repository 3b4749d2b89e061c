// =============================================================================
// Market Service — cached market overview endpoints
// =============================================================================
//
// Index levels (via ETF proxies), sector performance (via the SPDR sector
// ETFs), watchlist quotes, market status and raw aggregate bars. Every call
// goes through the response cache with its category TTL.
//
// Overview views never fail: when neither the network nor the cache can
// answer, zero-valued placeholders are returned (the cache has already pushed
// a notification for failures the user should see). Bars do propagate their
// error, since the chart pipeline reports "no data" itself.
//
// Overview panels fetch at medium priority. Bars and watchlist quotes take
// the priority of whoever asks, so background warm-up queues behind users.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{cache_key, CacheTtlConfig, EndpointCategory, ResponseCache};
use crate::clock::Clock;
use crate::error::ApiError;
use crate::market_data::Bar;
use crate::polygon::client::{bars_path, MARKET_STATUS_PATH, SNAPSHOT_PATH};
use crate::polygon::{MarketStatus, PolygonClient, Quote, RequestPriority};

/// ETFs standing in for the major indices.
const INDEX_TICKERS: [(&str, &str); 4] = [
    ("SPY", "S&P 500"),
    ("DIA", "Dow Jones Industrial Average"),
    ("QQQ", "Nasdaq Composite"),
    ("IWM", "Russell 2000"),
];

/// SPDR sector ETFs.
const SECTOR_ETFS: [(&str, &str); 11] = [
    ("XLK", "Technology"),
    ("XLV", "Healthcare"),
    ("XLF", "Financials"),
    ("XLY", "Consumer Discretionary"),
    ("XLC", "Communication Services"),
    ("XLI", "Industrials"),
    ("XLP", "Consumer Staples"),
    ("XLE", "Energy"),
    ("XLU", "Utilities"),
    ("XLRE", "Real Estate"),
    ("XLB", "Materials"),
];

const COMPANY_NAMES: [(&str, &str); 10] = [
    ("AAPL", "Apple Inc."),
    ("MSFT", "Microsoft Corporation"),
    ("GOOGL", "Alphabet Inc."),
    ("AMZN", "Amazon.com Inc."),
    ("NVDA", "NVIDIA Corporation"),
    ("META", "Meta Platforms Inc."),
    ("TSLA", "Tesla, Inc."),
    ("NFLX", "Netflix, Inc."),
    ("DIS", "The Walt Disney Company"),
    ("BA", "Boeing Company"),
];

fn rfc3339(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn company_name(symbol: &str) -> String {
    COMPANY_NAMES
        .iter()
        .find(|(s, _)| *s == symbol)
        .map_or(symbol, |(_, name)| *name)
        .to_string()
}

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketIndex {
    pub ticker: String,
    pub name: String,
    pub market: String,
    pub locale: String,
    pub value: f64,
    pub change: f64,
    pub change_percent: f64,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorPerformance {
    pub sector: String,
    pub ticker: String,
    /// Percent change today.
    pub performance: f64,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
}

// =============================================================================
// MarketService
// =============================================================================

pub struct MarketService {
    client: PolygonClient,
    cache: Arc<ResponseCache>,
    ttl: CacheTtlConfig,
    default_watchlist: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl MarketService {
    pub fn new(
        client: PolygonClient,
        cache: Arc<ResponseCache>,
        ttl: CacheTtlConfig,
        default_watchlist: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            cache,
            ttl,
            default_watchlist,
            clock,
        }
    }

    pub fn client(&self) -> &PolygonClient {
        &self.client
    }

    pub async fn market_status(&self) -> MarketStatus {
        let ttl = self.ttl.ttl(EndpointCategory::MarketStatus);
        match self
            .cache
            .cached_fetch(MARKET_STATUS_PATH, ttl, || {
                self.client.fetch_market_status(RequestPriority::Medium)
            })
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "market status unavailable, reporting unknown");
                MarketStatus::unknown(rfc3339(self.clock.now_ms()))
            }
        }
    }

    pub async fn market_indices(&self) -> Vec<MarketIndex> {
        let tickers: Vec<String> = INDEX_TICKERS.iter().map(|(t, _)| t.to_string()).collect();
        let quotes = self
            .quotes(&tickers, EndpointCategory::MarketIndices, RequestPriority::Medium)
            .await
            .unwrap_or_default();

        INDEX_TICKERS
            .iter()
            .map(|(ticker, name)| {
                let quote = quotes.get(*ticker);
                MarketIndex {
                    ticker: ticker.to_string(),
                    name: name.to_string(),
                    market: "stocks".to_string(),
                    locale: "us".to_string(),
                    value: quote.map_or(0.0, |q| q.price),
                    change: quote.map_or(0.0, |q| q.change),
                    change_percent: quote.map_or(0.0, |q| q.change_percent),
                    last_updated: rfc3339(
                        quote
                            .and_then(|q| q.updated_ms)
                            .unwrap_or_else(|| self.clock.now_ms()),
                    ),
                }
            })
            .collect()
    }

    pub async fn sector_performance(&self) -> Vec<SectorPerformance> {
        let tickers: Vec<String> = SECTOR_ETFS.iter().map(|(t, _)| t.to_string()).collect();
        let quotes = self
            .quotes(&tickers, EndpointCategory::SectorPerformance, RequestPriority::Medium)
            .await
            .unwrap_or_default();

        SECTOR_ETFS
            .iter()
            .map(|(ticker, sector)| {
                let quote = quotes.get(*ticker);
                SectorPerformance {
                    sector: sector.to_string(),
                    ticker: ticker.to_string(),
                    performance: quote.map_or(0.0, |q| q.change_percent),
                    change: quote.map_or(0.0, |q| q.change),
                }
            })
            .collect()
    }

    /// Quotes for `symbols`, in the order given. An empty list means the
    /// configured default watchlist.
    pub async fn watchlist(&self, symbols: &[String], priority: RequestPriority) -> Vec<WatchlistItem> {
        let mut symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            symbols = self.default_watchlist.clone();
        }

        let quotes = self
            .quotes(&symbols, EndpointCategory::Watchlist, priority)
            .await
            .unwrap_or_default();

        symbols
            .iter()
            .map(|symbol| {
                let quote = quotes.get(symbol);
                WatchlistItem {
                    symbol: symbol.clone(),
                    name: company_name(symbol),
                    price: quote.map_or(0.0, |q| q.price),
                    change: quote.map_or(0.0, |q| q.change),
                    change_percent: quote.map_or(0.0, |q| q.change_percent),
                }
            })
            .collect()
    }

    /// Raw aggregate bars, newest first as the API delivers them.
    pub async fn bars(
        &self,
        symbol: &str,
        multiplier: u32,
        timespan: &str,
        from: NaiveDate,
        to: NaiveDate,
        priority: RequestPriority,
    ) -> Result<Vec<Bar>, ApiError> {
        let key = cache_key(
            &bars_path(symbol, multiplier, timespan, from, to),
            &[("adjusted", Some("true".into())), ("sort", Some("desc".into()))],
        );
        let ttl = self.ttl.ttl(EndpointCategory::Aggregates);
        self.cache
            .cached_fetch(&key, ttl, || {
                self.client.fetch_bars(symbol, multiplier, timespan, from, to, priority)
            })
            .await
    }

    async fn quotes(
        &self,
        tickers: &[String],
        category: EndpointCategory,
        priority: RequestPriority,
    ) -> Result<BTreeMap<String, Quote>, ApiError> {
        let key = cache_key(SNAPSHOT_PATH, &[("tickers", Some(tickers.join(",")))]);
        let result = self
            .cache
            .cached_fetch(&key, self.ttl.ttl(category), || {
                self.client.fetch_snapshot(tickers, priority)
            })
            .await;

        if let Err(e) = &result {
            warn!(?category, error = %e, "quotes unavailable, serving placeholders");
        } else {
            debug!(?category, count = tickers.len(), "quotes resolved");
        }
        result
    }
}
