// =============================================================================
// Polygon.io REST Client — throttled, API-key authenticated market data
// =============================================================================
//
// SECURITY: The API key is sent as the `apiKey` query parameter (the only
// scheme the API accepts) and is never logged or serialized. Transport errors
// are stripped of their URL before they are reported, since the URL carries
// the key.
//
// Every call passes through the shared `RequestThrottler` at the priority
// the caller names. Failures are classified into the `ApiError` taxonomy:
//   401 / 403          -> Auth
//   429                -> RateLimited
//   other non-success  -> Network
//   transport timeout  -> Timeout
//   unreadable body    -> Data
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::throttle::{RequestPriority, RequestThrottler};
use super::types::{AggregatesResponse, MarketStatus, Quote, SnapshotResponse};
use crate::error::ApiError;
use crate::market_data::Bar;
use crate::runtime_config::ApiSettings;

pub const MARKET_STATUS_PATH: &str = "/v1/marketstatus/now";
pub const SNAPSHOT_PATH: &str = "/v2/snapshot/locale/us/markets/stocks/tickers";

/// Longest response body echoed into an error message.
const MAX_ERROR_BODY: usize = 200;

/// Path of the aggregates endpoint for one symbol / bar size / date range.
pub fn bars_path(symbol: &str, multiplier: u32, timespan: &str, from: NaiveDate, to: NaiveDate) -> String {
    format!(
        "/v2/aggs/ticker/{symbol}/range/{multiplier}/{timespan}/{}/{}",
        from.format("%Y-%m-%d"),
        to.format("%Y-%m-%d")
    )
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let detail: String = body.chars().take(MAX_ERROR_BODY).collect();
    let detail = format!("HTTP {status}: {detail}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(detail),
        _ => ApiError::Network(detail),
    }
}

fn classify_transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(err.without_url().to_string())
    }
}

/// Polygon.io REST client.
#[derive(Clone)]
pub struct PolygonClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    throttler: Arc<RequestThrottler>,
}

impl PolygonClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client. A missing key is allowed here; every request then
    /// fails with [`ApiError::Auth`] until one is configured.
    pub fn new(
        api_key: Option<String>,
        settings: &ApiSettings,
        throttler: Arc<RequestThrottler>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;

        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("no market-data API key configured; requests will fail until one is set");
        }
        debug!(base_url = %settings.base_url, "PolygonClient initialised");

        Ok(Self {
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
            throttler,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn throttler(&self) -> &RequestThrottler {
        &self.throttler
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    async fn get_json<T: DeserializeOwned>(
        &self,
        priority: RequestPriority,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::Auth("API key not configured".to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let request = self
            .client
            .get(&url)
            .query(params)
            .query(&[("apiKey", api_key)]);

        let resp = self
            .throttler
            .run(priority, request.send())
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?
            .map_err(classify_transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            let err = classify_status(status, &body);
            warn!(path, %status, error = %err, "market-data request rejected");
            return Err(err);
        }

        if body.trim().is_empty() {
            return Err(ApiError::Data(format!("empty response body from {path}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::Data(format!("failed to parse response from {path}: {e}")))
    }

    // -------------------------------------------------------------------------
    // Endpoints
    // -------------------------------------------------------------------------

    /// Aggregate bars for `symbol`, newest first (`sort=desc`).
    #[instrument(skip(self), name = "polygon::fetch_bars")]
    pub async fn fetch_bars(
        &self,
        symbol: &str,
        multiplier: u32,
        timespan: &str,
        from: NaiveDate,
        to: NaiveDate,
        priority: RequestPriority,
    ) -> Result<Vec<Bar>, ApiError> {
        let path = bars_path(symbol, multiplier, timespan, from, to);
        let params = [
            ("adjusted", "true".to_string()),
            ("sort", "desc".to_string()),
            ("limit", "50000".to_string()),
        ];
        let resp: AggregatesResponse = self.get_json(priority, &path, &params).await?;

        if resp.status.as_deref() == Some("ERROR") {
            return Err(ApiError::Data(format!("aggregates request for {symbol} returned ERROR")));
        }

        debug!(symbol, count = resp.results.len(), "bars fetched");
        Ok(resp.results)
    }

    /// Latest quote per ticker. Tickers the API does not know are absent from
    /// the map; an entirely empty answer is a data error.
    #[instrument(skip(self), name = "polygon::fetch_snapshot")]
    pub async fn fetch_snapshot(
        &self,
        tickers: &[String],
        priority: RequestPriority,
    ) -> Result<BTreeMap<String, Quote>, ApiError> {
        let params = [("tickers", tickers.join(","))];
        let resp: SnapshotResponse = self.get_json(priority, SNAPSHOT_PATH, &params).await?;

        if resp.tickers.is_empty() {
            return Err(ApiError::Data("no ticker data returned".to_string()));
        }

        let quotes: BTreeMap<String, Quote> = resp
            .tickers
            .iter()
            .map(|snap| (snap.ticker.clone(), Quote::from(snap)))
            .collect();

        debug!(requested = tickers.len(), received = quotes.len(), "snapshot fetched");
        Ok(quotes)
    }

    #[instrument(skip(self), name = "polygon::fetch_market_status")]
    pub async fn fetch_market_status(&self, priority: RequestPriority) -> Result<MarketStatus, ApiError> {
        let status: MarketStatus = self.get_json(priority, MARKET_STATUS_PATH, &[]).await?;
        debug!(market = %status.market, "market status fetched");
        Ok(status)
    }
}

impl std::fmt::Debug for PolygonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolygonClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("throttler", &self.throttler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn client(key: Option<&str>) -> PolygonClient {
        PolygonClient::new(
            key.map(str::to_string),
            &ApiSettings::default(),
            Arc::new(RequestThrottler::new(1, Duration::ZERO)),
        )
        .unwrap()
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            ApiError::Auth(_)
        ));
        assert!(matches!(classify_status(StatusCode::FORBIDDEN, ""), ApiError::Auth(_)));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::Network(_)
        ));
        let long = "x".repeat(1000);
        match classify_status(StatusCode::INTERNAL_SERVER_ERROR, &long) {
            ApiError::Network(msg) => assert!(msg.len() < 300),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn builds_aggregates_path() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 2, 2).unwrap();
        assert_eq!(
            bars_path("AAPL", 1, "hour", from, to),
            "/v2/aggs/ticker/AAPL/range/1/hour/2024-01-02/2024-02-02"
        );
    }

    #[tokio::test]
    async fn missing_key_is_an_auth_error() {
        let c = client(Some("   "));
        assert!(!c.has_api_key());
        let err = c.fetch_market_status(RequestPriority::High).await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
        assert_eq!(c.throttler().snapshot().requests_sent, 0);
    }

    #[test]
    fn debug_redacts_key() {
        let c = client(Some("secret-key"));
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }
}
