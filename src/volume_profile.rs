// =============================================================================
// Volume Profile — volume-by-price histogram and significant levels
// =============================================================================
//
// The price range [min(low) - buffer, max(high) + buffer], buffer = 5 % of the
// raw range, is split into N equal buckets. Each bar's volume is spread evenly
// over every bucket its [low, high] span touches. This is a uniform intrabar
// approximation, and the significant-level threshold is calibrated against it.
//
// Significant levels are the bucket midpoints whose volume exceeds
// `threshold * max(bucket volume)`, returned in ascending price order.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::Bar;

/// Default number of price buckets.
pub const DEFAULT_BUCKETS: usize = 20;
/// Default fraction of the peak bucket volume a level must exceed.
pub const DEFAULT_SIGNIFICANCE: f64 = 0.7;

/// Upper bound on the bucket count; larger requests are clamped to it.
pub const MAX_BUCKETS: usize = 500;

/// Fraction of the raw price range added on each side.
const RANGE_BUFFER: f64 = 0.05;

/// One bucket of the histogram. `price` is the bucket midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub volume: f64,
}

/// Build a `bucket_count`-bucket volume profile over `bars`.
///
/// Returns an empty vec when there are no usable bars or `bucket_count` is
/// zero. Bars with non-finite fields are skipped. `bucket_count` is clamped
/// to [`MAX_BUCKETS`].
pub fn build_volume_profile(bars: &[Bar], bucket_count: usize) -> Vec<PriceLevel> {
    if bucket_count == 0 {
        return Vec::new();
    }
    let bucket_count = bucket_count.min(MAX_BUCKETS);

    let usable: Vec<&Bar> = bars.iter().filter(|b| b.is_finite()).collect();
    if usable.is_empty() {
        return Vec::new();
    }

    let raw_min = usable
        .iter()
        .map(|b| b.low.min(b.high))
        .fold(f64::INFINITY, f64::min);
    let raw_max = usable
        .iter()
        .map(|b| b.low.max(b.high))
        .fold(f64::NEG_INFINITY, f64::max);

    let span = raw_max - raw_min;
    // A single flat price has no range; widen around it so buckets have width.
    let buffer = if span > 0.0 {
        span * RANGE_BUFFER
    } else if raw_min != 0.0 {
        raw_min.abs() * RANGE_BUFFER
    } else {
        1.0
    };
    let min_price = raw_min - buffer;
    let max_price = raw_max + buffer;
    let step = (max_price - min_price) / bucket_count as f64;

    let mut levels: Vec<PriceLevel> = (0..bucket_count)
        .map(|i| PriceLevel {
            price: min_price + step * (i as f64 + 0.5),
            volume: 0.0,
        })
        .collect();

    let bucket_of = |price: f64| -> usize {
        let idx = ((price - min_price) / step).floor();
        if idx <= 0.0 {
            0
        } else {
            (idx as usize).min(bucket_count - 1)
        }
    };

    for bar in usable {
        let low_index = bucket_of(bar.low.min(bar.high));
        let high_index = bucket_of(bar.low.max(bar.high));
        let share = bar.volume / (high_index - low_index + 1) as f64;
        for level in &mut levels[low_index..=high_index] {
            level.volume += share;
        }
    }

    debug!(
        buckets = bucket_count,
        min_price, max_price, "volume profile built"
    );
    levels
}

/// Prices of the levels whose volume is strictly above
/// `threshold * max_volume`, in bucket (ascending price) order.
pub fn find_significant_levels(levels: &[PriceLevel], threshold: f64) -> Vec<f64> {
    let max_volume = levels
        .iter()
        .map(|l| l.volume)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_volume.is_finite() {
        return Vec::new();
    }

    let cutoff = max_volume * threshold;
    levels
        .iter()
        .filter(|l| l.volume > cutoff)
        .map(|l| l.price)
        .collect()
}
