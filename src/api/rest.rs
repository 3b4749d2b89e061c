// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The dashboard is single-user and runs
// locally, so there is no authentication layer.
//
// Failures reach the client as JSON `{ "error": ..., "category": ... }`:
//   auth → 401, rate limit → 429, timeout → 504, other upstream → 502,
//   invalid query → 422, nothing loaded yet → 404.
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::cache::UsageStats;
use crate::error::ApiError;
use crate::indicators::IndicatorSet;
use crate::pipeline::{ChartPeriod, ChartRequest};
use crate::polygon::throttle::ThrottleSnapshot;
use crate::polygon::RequestPriority;
use crate::volume_profile::MAX_BUCKETS;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        // ── Charts ──────────────────────────────────────────────────
        .route("/api/v1/chart/current", get(current_chart))
        .route("/api/v1/chart/:symbol", get(chart))
        .route("/api/v1/volume-profile/:symbol", get(volume_profile))
        // ── Market overview ─────────────────────────────────────────
        .route("/api/v1/market/status", get(market_status))
        .route("/api/v1/market/indices", get(market_indices))
        .route("/api/v1/market/sectors", get(market_sectors))
        .route("/api/v1/watchlist", get(watchlist))
        // ── Cache & usage ───────────────────────────────────────────
        .route("/api/v1/usage", get(usage))
        .route("/api/v1/usage/reset", post(reset_usage))
        .route("/api/v1/cache", delete(clear_cache))
        .route("/api/v1/cache/evict", post(evict_cache))
        .route("/api/v1/notifications", get(notifications))
        // ── Request queue ───────────────────────────────────────────
        .route("/api/v1/throttle/pause", post(pause_requests))
        .route("/api/v1/throttle/resume", post(resume_requests))
        .route("/api/v1/throttle/queue", delete(clear_request_queue))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error responses
// =============================================================================

#[derive(Debug)]
enum RestError {
    Api(ApiError),
    Invalid(String),
    NotFound(&'static str),
}

impl From<ApiError> for RestError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    category: String,
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let (status, category, error) = match self {
            Self::Api(err) => {
                let status = match &err {
                    ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
                    ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                    ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    ApiError::Network(_) | ApiError::Data(_) => StatusCode::BAD_GATEWAY,
                    ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.category().to_string(), err.to_string())
            }
            Self::Invalid(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request".to_string(), msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found".to_string(), msg.to_string()),
        };

        if status.is_server_error() {
            warn!(status = %status, error = %error, "request failed");
        }
        (status, Json(ErrorBody { error, category })).into_response()
    }
}

fn parse_period(raw: Option<&str>) -> Result<ChartPeriod, RestError> {
    match raw {
        None => Ok(ChartPeriod::default()),
        Some(p) => p
            .parse::<ChartPeriod>()
            .map_err(|e| RestError::Invalid(e.to_string())),
    }
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status())
}

// =============================================================================
// Charts
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChartQuery {
    #[serde(default)]
    period: Option<String>,
    /// Comma-separated, e.g. `sma,ema,rsi`.
    #[serde(default)]
    indicators: Option<String>,
}

async fn chart(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<impl IntoResponse, RestError> {
    let period = parse_period(query.period.as_deref())?;
    let requested = match query.indicators.as_deref() {
        Some(list) => IndicatorSet::parse_list(list).map_err(|e| RestError::Invalid(e.to_string()))?,
        None => IndicatorSet::default(),
    };
    let indicators = if requested.is_empty() {
        state.pipeline.settings().default_indicators.clone()
    } else {
        requested
    };

    let view = state
        .pipeline
        .load_current(ChartRequest::new(&symbol, period, indicators))
        .await?;
    state.increment_version();
    Ok(Json(view))
}

async fn current_chart(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, RestError> {
    state
        .pipeline
        .session()
        .current_view()
        .map(Json)
        .ok_or(RestError::NotFound("no chart loaded yet"))
}

#[derive(Debug, Deserialize)]
struct VolumeProfileQuery {
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    buckets: Option<usize>,
    #[serde(default)]
    threshold: Option<f64>,
}

async fn volume_profile(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<VolumeProfileQuery>,
) -> Result<impl IntoResponse, RestError> {
    let period = parse_period(query.period.as_deref())?;
    if let Some(b) = query.buckets {
        if !(1..=MAX_BUCKETS).contains(&b) {
            return Err(RestError::Invalid(format!(
                "buckets {b} outside [1, {MAX_BUCKETS}]"
            )));
        }
    }
    if let Some(t) = query.threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(RestError::Invalid(format!("threshold {t} outside [0, 1]")));
        }
    }

    let profile = state
        .pipeline
        .volume_profile(&symbol, period, query.buckets, query.threshold)
        .await?;
    Ok(Json(profile))
}

// =============================================================================
// Market overview
// =============================================================================

async fn market_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.market.market_status().await)
}

async fn market_indices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.market.market_indices().await)
}

async fn market_sectors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.market.sector_performance().await)
}

#[derive(Debug, Deserialize)]
struct WatchlistQuery {
    #[serde(default)]
    symbols: Option<String>,
}

async fn watchlist(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WatchlistQuery>,
) -> impl IntoResponse {
    let symbols: Vec<String> = query
        .symbols
        .as_deref()
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    Json(state.market.watchlist(&symbols, RequestPriority::Medium).await)
}

// =============================================================================
// Cache & usage
// =============================================================================

#[derive(Serialize)]
struct UsageResponse {
    #[serde(flatten)]
    stats: UsageStats,
    daily_budget: u32,
    remaining: u32,
    throttle: ThrottleSnapshot,
}

fn usage_response(state: &AppState, stats: UsageStats) -> UsageResponse {
    let daily_budget = state.cache.daily_budget();
    UsageResponse {
        remaining: daily_budget.saturating_sub(stats.daily_requests),
        stats,
        daily_budget,
        throttle: state.throttler.snapshot(),
    }
}

async fn usage(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.cache.usage_stats();
    Json(usage_response(&state, stats))
}

async fn reset_usage(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.cache.reset_usage_stats();
    state.increment_version();
    info!("usage stats reset via API");
    Json(usage_response(&state, stats))
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let removed = state.cache.clear();
    state.increment_version();
    Json(serde_json::json!({ "removed": removed }))
}

async fn evict_cache(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let removed = state.cache.evict_old();
    if removed > 0 {
        state.increment_version();
    }
    Json(serde_json::json!({ "removed": removed }))
}

// =============================================================================
// Request queue
// =============================================================================

async fn pause_requests(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.throttler.pause();
    state.increment_version();
    Json(state.throttler.snapshot())
}

async fn resume_requests(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.throttler.resume();
    state.increment_version();
    Json(state.throttler.snapshot())
}

async fn clear_request_queue(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let dropped = state.throttler.clear();
    if dropped > 0 {
        state.increment_version();
    }
    Json(serde_json::json!({ "dropped": dropped }))
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Deserialize)]
struct NotificationsQuery {
    /// Only return notifications with an id greater than this.
    #[serde(default)]
    since: Option<u64>,
}

async fn notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationsQuery>,
) -> impl IntoResponse {
    let items = match query.since {
        Some(id) => state.notifications.since(id),
        None => state.notifications.recent(),
    };
    Json(items)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use chrono::NaiveDate;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{cache_key, MemoryStorage};
    use crate::clock::ManualClock;
    use crate::market_data::Bar;
    use crate::polygon::client::bars_path;
    use crate::runtime_config::DashboardConfig;

    // 2024-03-01T12:00:00Z
    const T0: i64 = 1_709_294_400_000;

    fn test_state() -> Arc<AppState> {
        let state = AppState::with_parts(
            DashboardConfig::default(),
            None,
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(T0)),
        )
        .unwrap();
        Arc::new(state)
    }

    fn seed_aapl_month(state: &AppState) {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let (from, to) = ChartPeriod::OneMonth.date_range(today);
        let key = cache_key(
            &bars_path("AAPL", 1, "hour", from, to),
            &[("adjusted", Some("true".into())), ("sort", Some("desc".into()))],
        );
        let newest_first: Vec<Bar> = (0..60)
            .rev()
            .map(|i| {
                let close = 180.0 + (i % 7) as f64;
                Bar::new(close, close + 1.0, close - 1.0, close, 5_000.0, i * 3_600_000)
            })
            .collect();
        state.cache.set(&key, &newest_first, Duration::from_secs(600));
    }

    async fn call(state: &Arc<AppState>, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = router(state.clone())
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let state = test_state();
        let (status, body) = call(&state, Method::GET, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["api_key_configured"], false);
    }

    #[tokio::test]
    async fn bad_period_is_rejected() {
        let state = test_state();
        let (status, body) = call(&state, Method::GET, "/api/v1/chart/AAPL?period=2W").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["category"], "invalid_request");

        let (status, _) = call(&state, Method::GET, "/api/v1/chart/AAPL?indicators=sma,vwap").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn missing_key_maps_to_unauthorized() {
        let state = test_state();
        let (status, body) = call(&state, Method::GET, "/api/v1/chart/MSFT").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["category"], "auth");
    }

    #[tokio::test]
    async fn chart_becomes_current() {
        let state = test_state();
        let (status, _) = call(&state, Method::GET, "/api/v1/chart/current").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        seed_aapl_month(&state);
        let (status, body) = call(&state, Method::GET, "/api/v1/chart/aapl?period=1M&indicators=sma,rsi").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["period"], "1M");
        assert_eq!(body["raw_points"], 60);
        assert!(body["bars"][0]["sma"].is_number());
        assert!(body["bars"][0].get("macd").is_none());

        let (status, current) = call(&state, Method::GET, "/api/v1/chart/current").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(current["symbol"], "AAPL");
        assert_eq!(state.current_state_version(), 2);
    }

    #[tokio::test]
    async fn volume_profile_endpoint() {
        let state = test_state();
        seed_aapl_month(&state);
        let (status, body) = call(&state, Method::GET, "/api/v1/volume-profile/AAPL?buckets=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["levels"].as_array().unwrap().len(), 5);

        let (status, _) = call(&state, Method::GET, "/api/v1/volume-profile/AAPL?threshold=1.5").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn bucket_count_out_of_range_is_rejected() {
        let state = test_state();
        seed_aapl_month(&state);
        for uri in [
            "/api/v1/volume-profile/AAPL?buckets=0",
            "/api/v1/volume-profile/AAPL?buckets=501",
            "/api/v1/volume-profile/AAPL?buckets=2305843009213693951",
        ] {
            let (status, body) = call(&state, Method::GET, uri).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
            assert_eq!(body["category"], "invalid_request");
        }

        let (status, body) = call(&state, Method::GET, "/api/v1/volume-profile/AAPL?buckets=500").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["levels"].as_array().unwrap().len(), 500);
    }

    #[tokio::test]
    async fn overview_degrades_to_placeholders() {
        let state = test_state();
        let (status, body) = call(&state, Method::GET, "/api/v1/market/indices").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 4);
        assert_eq!(body[0]["value"], 0.0);

        let (_, body) = call(&state, Method::GET, "/api/v1/watchlist?symbols=tsla,nflx").await;
        assert_eq!(body[0]["symbol"], "TSLA");
        assert_eq!(body[1]["name"], "Netflix, Inc.");
    }

    #[tokio::test]
    async fn clearing_cache_posts_notification() {
        let state = test_state();
        seed_aapl_month(&state);

        let (status, body) = call(&state, Method::DELETE, "/api/v1/cache").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);

        let (_, notes) = call(&state, Method::GET, "/api/v1/notifications").await;
        let messages: Vec<&str> = notes
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|n| n["message"].as_str())
            .collect();
        assert!(messages.contains(&"API cache cleared"));

        let last_id = notes.as_array().unwrap().last().unwrap()["id"].as_u64().unwrap();
        let (_, newer) = call(&state, Method::GET, &format!("/api/v1/notifications?since={last_id}")).await;
        assert!(newer.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn usage_and_reset() {
        let state = test_state();
        let (status, body) = call(&state, Method::GET, "/api/v1/usage").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["daily_requests"], 0);
        assert_eq!(body["remaining"], 100);
        assert_eq!(body["last_reset_date"], "2024-03-01");

        let (status, body) = call(&state, Method::POST, "/api/v1/usage/reset").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["daily_budget"], 100);

        let (status, body) = call(&state, Method::POST, "/api/v1/cache/evict").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 0);
    }

    #[tokio::test]
    async fn request_queue_can_be_paused_and_cleared() {
        let state = test_state();

        let (status, body) = call(&state, Method::POST, "/api/v1/throttle/pause").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paused"], true);
        assert_eq!(body["queued"], 0);

        let (_, usage) = call(&state, Method::GET, "/api/v1/usage").await;
        assert_eq!(usage["throttle"]["paused"], true);

        let (status, body) = call(&state, Method::DELETE, "/api/v1/throttle/queue").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dropped"], 0);

        let (_, body) = call(&state, Method::POST, "/api/v1/throttle/resume").await;
        assert_eq!(body["paused"], false);
        assert_eq!(state.current_state_version(), 3);
    }
}
