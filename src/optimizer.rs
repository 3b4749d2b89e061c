// =============================================================================
// Density Optimizer — bounded-size series ahead of indicator computation
// =============================================================================
//
// Oversized bar sequences are thinned to at most `max_points + 1` samples by
// keeping every `stride`-th element (stride = ceil(len / max_points)) and
// always re-appending the final bar. This runs before the indicator engine, so
// indicator periods are counted in samples of the thinned series.
//
// `optimization_level` picks `max_points` from the serialized payload size.
// =============================================================================

use tracing::debug;

use crate::market_data::{Bar, ChronologicalBars};

/// Default point budget for a chart series.
pub const DEFAULT_MAX_POINTS: usize = 500;

/// Thin `items` to at most `max_points + 1` elements, preserving order and
/// always keeping the last element.
///
/// `max_points == 0` is treated as 1.
pub fn optimize<T: Clone>(items: &[T], max_points: usize) -> Vec<T> {
    let max_points = max_points.max(1);
    if items.len() <= max_points {
        return items.to_vec();
    }

    let stride = items.len().div_ceil(max_points);
    let last_index = items.len() - 1;

    let mut out: Vec<T> = items.iter().step_by(stride).cloned().collect();
    if last_index % stride != 0 {
        out.push(items[last_index].clone());
    }

    debug!(
        input = items.len(),
        output = out.len(),
        stride,
        "series thinned"
    );
    out
}

/// Thin a chronological series. The result is still chronological.
pub fn optimize_bars(bars: &ChronologicalBars, max_points: usize) -> ChronologicalBars {
    ChronologicalBars::from_sampled(optimize(bars.as_slice(), max_points))
}

/// Choose a point budget from the JSON size of the series:
/// >1000 KB → 250, >500 KB → 500, >200 KB → 1000, otherwise no reduction
/// (the full length).
pub fn optimization_level(bars: &[Bar]) -> usize {
    let size_kb = serde_json::to_vec(bars)
        .map(|v| v.len() as f64 / 1024.0)
        .unwrap_or(0.0);

    if size_kb > 1000.0 {
        250
    } else if size_kb > 500.0 {
        500
    } else if size_kb > 200.0 {
        1000
    } else {
        bars.len()
    }
}
