// =============================================================================
// Chart Pipeline — bars -> density optimizer -> indicators, plus volume profile
// =============================================================================
//
// Per request:
//   1. Resolve the chart period to a bar size and date range.
//   2. Fetch bars through the cache (newest-first from the API) and put them
//      in chronological order.
//   3. Thin them to the point budget, then compute indicators over the
//      thinned series. Indicator periods therefore count thinned samples.
//   4. Build the volume profile over the raw chronological bars.
//   5. Return the annotated series newest-first, the order charts display.
//
// `ChartSession` tracks the chart the user is looking at. Each load is tagged
// with a ticket; a load that finishes after a newer one was started is
// discarded instead of overwriting the newer chart.
// =============================================================================

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Days, Months, NaiveDate};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::ApiError;
use crate::indicators::{compute_indicators_with, AnnotatedBar, IndicatorSet};
use crate::market::MarketService;
use crate::market_data::ChronologicalBars;
use crate::optimizer::{optimization_level, optimize_bars};
use crate::polygon::RequestPriority;
use crate::runtime_config::ChartSettings;
use crate::volume_profile::{build_volume_profile, find_significant_levels, PriceLevel};

// =============================================================================
// Chart periods
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChartPeriod {
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "1W")]
    OneWeek,
    #[default]
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "6M")]
    SixMonths,
    #[serde(rename = "1Y")]
    OneYear,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown chart period '{0}' (expected 1D, 1W, 1M, 3M, 6M or 1Y)")]
pub struct UnknownPeriod(pub String);

impl ChartPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1D",
            Self::OneWeek => "1W",
            Self::OneMonth => "1M",
            Self::ThreeMonths => "3M",
            Self::SixMonths => "6M",
            Self::OneYear => "1Y",
        }
    }

    /// Bar size as (multiplier, timespan).
    pub fn resolution(self) -> (u32, &'static str) {
        match self {
            Self::OneDay => (5, "minute"),
            Self::OneWeek => (30, "minute"),
            Self::OneMonth => (1, "hour"),
            Self::ThreeMonths => (4, "hour"),
            Self::SixMonths | Self::OneYear => (1, "day"),
        }
    }

    /// Inclusive date range ending `today`.
    pub fn date_range(self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let from = match self {
            Self::OneDay => today.checked_sub_days(Days::new(1)),
            Self::OneWeek => today.checked_sub_days(Days::new(7)),
            Self::OneMonth => today.checked_sub_months(Months::new(1)),
            Self::ThreeMonths => today.checked_sub_months(Months::new(3)),
            Self::SixMonths => today.checked_sub_months(Months::new(6)),
            Self::OneYear => today.checked_sub_months(Months::new(12)),
        };
        (from.unwrap_or(today), today)
    }
}

impl FromStr for ChartPeriod {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1D" => Ok(Self::OneDay),
            "1W" => Ok(Self::OneWeek),
            "1M" => Ok(Self::OneMonth),
            "3M" => Ok(Self::ThreeMonths),
            "6M" => Ok(Self::SixMonths),
            "1Y" => Ok(Self::OneYear),
            _ => Err(UnknownPeriod(s.to_string())),
        }
    }
}

impl std::fmt::Display for ChartPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Requests and results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartRequest {
    pub symbol: String,
    pub period: ChartPeriod,
    pub indicators: IndicatorSet,
}

impl ChartRequest {
    pub fn new(symbol: &str, period: ChartPeriod, indicators: IndicatorSet) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            period,
            indicators,
        }
    }

    /// Identity of the request context, e.g. `AAPL:1M:sma,rsi`.
    pub fn context_key(&self) -> String {
        format!("{}:{}:{}", self.symbol, self.period, self.indicators)
    }
}

/// Output of the pure analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    /// Annotated (thinned) bars, newest first.
    pub bars: Vec<AnnotatedBar>,
    pub volume_profile: Vec<PriceLevel>,
    pub significant_levels: Vec<f64>,
    pub raw_points: usize,
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartView {
    pub symbol: String,
    pub period: ChartPeriod,
    pub indicators: IndicatorSet,
    #[serde(flatten)]
    pub analysis: Analysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeProfileView {
    pub symbol: String,
    pub period: ChartPeriod,
    pub levels: Vec<PriceLevel>,
    pub significant_levels: Vec<f64>,
}

/// Run the analytics over chronological bars. Empty input gives an empty
/// analysis.
pub fn analyze(bars: &ChronologicalBars, indicators: &IndicatorSet, settings: &ChartSettings) -> Analysis {
    let max_points = optimization_level(bars.as_slice()).min(settings.max_points);
    let thinned = optimize_bars(bars, max_points);

    let mut annotated = compute_indicators_with(&thinned, indicators, &settings.indicator_settings);
    annotated.reverse();

    let volume_profile = build_volume_profile(bars.as_slice(), settings.volume_buckets);
    let significant_levels = find_significant_levels(&volume_profile, settings.significant_threshold);

    Analysis {
        points: annotated.len(),
        raw_points: bars.len(),
        bars: annotated,
        volume_profile,
        significant_levels,
    }
}

// =============================================================================
// ChartSession — discard loads that no longer match the current chart
// =============================================================================

/// Handle for one in-flight load.
#[derive(Debug, Clone)]
pub struct Ticket {
    id: u64,
    context: String,
}

struct CurrentChart {
    ticket: u64,
    request: ChartRequest,
    view: Option<ChartView>,
}

#[derive(Default)]
pub struct ChartSession {
    generation: AtomicU64,
    current: RwLock<Option<CurrentChart>>,
}

impl ChartSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `request` the current chart and issue its ticket. Any earlier
    /// ticket is superseded. The previous view is kept only if it belongs to
    /// the same request context.
    pub fn begin(&self, request: ChartRequest) -> Ticket {
        let context = request.context_key();

        // Ids are issued under the lock so the newest id is always current.
        let mut current = self.current.write();
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let view = current
            .take()
            .and_then(|c| c.view)
            .filter(|v| v.symbol == request.symbol && v.period == request.period && v.indicators == request.indicators);
        *current = Some(CurrentChart {
            ticket: id,
            request,
            view,
        });

        Ticket { id, context }
    }

    /// Apply a finished load. Returns `false` (and drops `view`) when a newer
    /// load has been started since `ticket` was issued.
    pub fn apply(&self, ticket: &Ticket, view: ChartView) -> bool {
        let mut current = self.current.write();
        match current.as_mut() {
            Some(chart) if chart.ticket == ticket.id => {
                chart.view = Some(view);
                true
            }
            _ => {
                debug!(
                    ticket = ticket.id,
                    context = %ticket.context,
                    "stale chart load discarded"
                );
                false
            }
        }
    }

    /// The current chart's ticket and request, read together. A reload made
    /// with this ticket loses to any `begin` that happens while it runs.
    pub fn current_ticket(&self) -> Option<(Ticket, ChartRequest)> {
        self.current.read().as_ref().map(|c| {
            let ticket = Ticket {
                id: c.ticket,
                context: c.request.context_key(),
            };
            (ticket, c.request.clone())
        })
    }

    pub fn current_request(&self) -> Option<ChartRequest> {
        self.current.read().as_ref().map(|c| c.request.clone())
    }

    pub fn current_view(&self) -> Option<ChartView> {
        self.current.read().as_ref().and_then(|c| c.view.clone())
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

// =============================================================================
// ChartPipeline
// =============================================================================

pub struct ChartPipeline {
    market: Arc<MarketService>,
    settings: ChartSettings,
    clock: Arc<dyn Clock>,
    session: ChartSession,
}

impl ChartPipeline {
    pub fn new(market: Arc<MarketService>, settings: ChartSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            market,
            settings,
            clock,
            session: ChartSession::new(),
        }
    }

    pub fn settings(&self) -> &ChartSettings {
        &self.settings
    }

    pub fn session(&self) -> &ChartSession {
        &self.session
    }

    /// Chronological bars for `symbol` over `period`.
    async fn chronological_bars(
        &self,
        symbol: &str,
        period: ChartPeriod,
        priority: RequestPriority,
    ) -> Result<ChronologicalBars, ApiError> {
        let (multiplier, timespan) = period.resolution();
        let (from, to) = period.date_range(self.clock.today());
        let newest_first = self
            .market
            .bars(symbol, multiplier, timespan, from, to, priority)
            .await?;

        ChronologicalBars::from_newest_first(newest_first).map_err(|e| {
            warn!(symbol, error = %e, "bars arrived out of order");
            ApiError::Data(e.to_string())
        })
    }

    /// Load and analyse one chart without touching the session.
    pub async fn load(&self, request: &ChartRequest) -> Result<ChartView, ApiError> {
        self.load_at(request, RequestPriority::High).await
    }

    #[instrument(skip(self), fields(symbol = %request.symbol, period = %request.period))]
    async fn load_at(&self, request: &ChartRequest, priority: RequestPriority) -> Result<ChartView, ApiError> {
        let bars = self
            .chronological_bars(&request.symbol, request.period, priority)
            .await?;
        let analysis = analyze(&bars, &request.indicators, &self.settings);

        debug!(
            raw = analysis.raw_points,
            points = analysis.points,
            levels = analysis.significant_levels.len(),
            "chart analysed"
        );

        Ok(ChartView {
            symbol: request.symbol.clone(),
            period: request.period,
            indicators: request.indicators.clone(),
            analysis,
        })
    }

    /// Make `request` the current chart and load it. The view is returned to
    /// the caller either way; it only becomes the session's chart if no newer
    /// load started in the meantime.
    pub async fn load_current(&self, request: ChartRequest) -> Result<ChartView, ApiError> {
        let ticket = self.session.begin(request.clone());
        self.load_for(&ticket, &request, RequestPriority::High).await
    }

    /// Reload whatever chart is current, in the background. `None` when no
    /// chart was ever opened. The result is dropped from the session if the
    /// user switched charts while it loaded.
    pub async fn refresh_current(&self) -> Option<Result<ChartView, ApiError>> {
        let (ticket, request) = self.session.current_ticket()?;
        Some(self.load_for(&ticket, &request, RequestPriority::Low).await)
    }

    async fn load_for(
        &self,
        ticket: &Ticket,
        request: &ChartRequest,
        priority: RequestPriority,
    ) -> Result<ChartView, ApiError> {
        let view = self.load_at(request, priority).await?;
        self.session.apply(ticket, view.clone());
        Ok(view)
    }

    pub async fn volume_profile(
        &self,
        symbol: &str,
        period: ChartPeriod,
        buckets: Option<usize>,
        threshold: Option<f64>,
    ) -> Result<VolumeProfileView, ApiError> {
        let symbol = symbol.trim().to_uppercase();
        let bars = self
            .chronological_bars(&symbol, period, RequestPriority::High)
            .await?;

        let levels = build_volume_profile(
            bars.as_slice(),
            buckets.unwrap_or(self.settings.volume_buckets),
        );
        let significant_levels = find_significant_levels(
            &levels,
            threshold.unwrap_or(self.settings.significant_threshold),
        );

        Ok(VolumeProfileView {
            symbol,
            period,
            levels,
            significant_levels,
        })
    }

    /// Warm the cache with bars for `symbols` at background priority.
    /// Returns how many succeeded.
    pub async fn prefetch(&self, symbols: &[String], period: ChartPeriod) -> usize {
        let loads = symbols
            .iter()
            .map(|symbol| self.chronological_bars(symbol, period, RequestPriority::Low));
        let ok = join_all(loads).await.into_iter().filter(Result::is_ok).count();
        info!(requested = symbols.len(), ok, %period, "bars prefetched");
        ok
    }
}
