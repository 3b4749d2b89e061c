// =============================================================================
// Market Pulse — Main Entry Point
// =============================================================================
//
// Serves the dashboard API and keeps the current chart fresh in the
// background. Cache entries are only evicted under storage pressure, so stale
// data stays available as a fallback through long outages.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cache;
mod clock;
mod error;
mod indicators;
mod market;
mod market_data;
mod notifications;
mod optimizer;
mod pipeline;
mod polygon;
mod runtime_config;
mod volume_profile;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::pipeline::ChartPeriod;
use crate::polygon::RequestPriority;
use crate::runtime_config::DashboardConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Market Pulse — Starting Up                        ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("MARKET_PULSE_CONFIG").unwrap_or_else(|_| "dashboard_config.json".into());

    let config = DashboardConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        DashboardConfig::default()
    });

    let api_key = std::env::var("POLYGON_API_KEY").ok();

    info!(
        watchlist = ?config.watchlist,
        daily_budget = config.usage.daily_budget,
        max_points = config.chart.max_points,
        "Configuration ready"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, api_key)?);

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("MARKET_PULSE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3001".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "Failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 4. Warm the watchlist ────────────────────────────────────────────
    // Background priority: anything a user asks for overtakes the warm-up.
    if state.market.client().has_api_key() {
        let warm_state = state.clone();
        tokio::spawn(async move {
            let items = warm_state.market.watchlist(&[], RequestPriority::Low).await;
            info!(count = items.len(), "Watchlist quotes warmed");

            let symbols: Vec<String> = items.into_iter().map(|item| item.symbol).collect();
            warm_state.pipeline.prefetch(&symbols, ChartPeriod::default()).await;
        });
    }

    // ── 5. Chart refresh loop ────────────────────────────────────────────
    let refresh_state = state.clone();
    let refresh_every = Duration::from_secs(
        state.config.read().chart.refresh_interval_secs.max(1),
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            match refresh_state.pipeline.refresh_current().await {
                Some(Ok(view)) => {
                    refresh_state.increment_version();
                    debug!(symbol = %view.symbol, points = view.analysis.points, "Current chart refreshed");
                }
                Some(Err(e)) => warn!(error = %e, "Chart refresh failed"),
                None => {}
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.config.read().save(&config_path) {
        error!(error = %e, "Failed to save dashboard config on shutdown");
    }

    info!("Market Pulse shut down complete.");
    Ok(())
}
