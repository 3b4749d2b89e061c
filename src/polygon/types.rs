// =============================================================================
// Polygon.io payloads and the quote view derived from them
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::market_data::Bar;

/// `GET /v2/aggs/ticker/{symbol}/range/...`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatesResponse {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub results_count: Option<u64>,
    #[serde(default)]
    pub results: Vec<Bar>,
}

/// `GET /v1/marketstatus/now`. Also the cached and served representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStatus {
    pub market: String,
    pub server_time: String,
    #[serde(default)]
    pub exchanges: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub currencies: BTreeMap<String, serde_json::Value>,
}

impl MarketStatus {
    /// Placeholder served when neither the API nor the cache can answer.
    pub fn unknown(server_time: String) -> Self {
        Self {
            market: "unknown".to_string(),
            server_time,
            exchanges: BTreeMap::new(),
            currencies: BTreeMap::new(),
        }
    }
}

/// `GET /v2/snapshot/locale/us/markets/stocks/tickers`
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tickers: Vec<TickerSnapshot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerSnapshot {
    pub ticker: String,
    #[serde(default)]
    pub todays_change: f64,
    #[serde(default)]
    pub todays_change_perc: f64,
    #[serde(default)]
    pub day: Option<DayAggregate>,
    #[serde(default)]
    pub prev_day: Option<DayAggregate>,
    #[serde(default)]
    pub last_trade: Option<LastTrade>,
    /// Nanoseconds since the epoch.
    #[serde(default)]
    pub updated: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DayAggregate {
    #[serde(default)]
    pub o: f64,
    #[serde(default)]
    pub h: f64,
    #[serde(default)]
    pub l: f64,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub v: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LastTrade {
    #[serde(default)]
    pub p: f64,
}

/// Normalised per-ticker quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    pub volume: f64,
    /// Epoch milliseconds of the last update, when the API reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_ms: Option<i64>,
}

impl From<&TickerSnapshot> for Quote {
    fn from(snap: &TickerSnapshot) -> Self {
        let day = snap.day.unwrap_or_default();
        // Last trade price wins; a zero print falls back to the day close.
        let price = snap
            .last_trade
            .map(|t| t.p)
            .filter(|p| *p != 0.0)
            .unwrap_or(day.c);

        Self {
            ticker: snap.ticker.clone(),
            price,
            change: snap.todays_change,
            change_percent: snap.todays_change_perc,
            open: day.o,
            high: day.h,
            low: day.l,
            previous_close: snap.prev_day.map(|d| d.c).unwrap_or_default(),
            volume: day.v,
            updated_ms: snap.updated.map(|ns| ns / 1_000_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_parses_into_quotes() {
        let json = r#"{
            "status": "OK",
            "tickers": [
                {
                    "ticker": "SPY",
                    "todaysChange": 1.5,
                    "todaysChangePerc": 0.31,
                    "day": { "o": 480.0, "h": 484.0, "l": 479.0, "c": 483.0, "v": 1000000, "vw": 481.2 },
                    "prevDay": { "o": 478.0, "h": 482.0, "l": 477.0, "c": 481.5, "v": 900000 },
                    "lastTrade": { "p": 483.2, "s": 100, "x": 4 },
                    "updated": 1709294400000000000
                },
                { "ticker": "DIA", "todaysChange": -0.2, "todaysChangePerc": -0.05,
                  "day": { "c": 390.0 }, "lastTrade": { "p": 0 } }
            ]
        }"#;
        let resp: SnapshotResponse = serde_json::from_str(json).unwrap();
        let spy = Quote::from(&resp.tickers[0]);
        assert_eq!(spy.price, 483.2);
        assert_eq!(spy.previous_close, 481.5);
        assert_eq!(spy.updated_ms, Some(1_709_294_400_000));

        let dia = Quote::from(&resp.tickers[1]);
        assert_eq!(dia.price, 390.0);
        assert_eq!(dia.change, -0.2);
        assert_eq!(dia.updated_ms, None);
    }

    #[test]
    fn aggregates_accept_short_field_names() {
        let json = r#"{
            "ticker": "AAPL", "status": "OK", "resultsCount": 2,
            "results": [
                { "o": 2.0, "h": 3.0, "l": 1.5, "c": 2.5, "v": 200, "vw": 2.4, "t": 1709337600000, "n": 12 },
                { "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 100, "t": 1709251200000 }
            ]
        }"#;
        let resp: AggregatesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].close, 2.5);
        assert_eq!(resp.results_count, Some(2));
    }

    #[test]
    fn market_status_roundtrips_camel_case() {
        let json = r#"{ "market": "open", "serverTime": "2024-03-01T09:30:00-05:00",
                        "exchanges": { "nasdaq": "open", "nyse": "open" } }"#;
        let status: MarketStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.market, "open");
        assert!(status.currencies.is_empty());
        let back = serde_json::to_value(&status).unwrap();
        assert_eq!(back["serverTime"], "2024-03-01T09:30:00-05:00");
    }
}
