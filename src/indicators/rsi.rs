// =============================================================================
// RSI — Wilder-smoothed relative strength, aligned to the close series
// =============================================================================
//
// Gains and losses are the positive and negative parts of close-to-close
// deltas. The first `period` deltas are averaged plainly to seed the
// smoothing; each later delta folds in with weight 1/period:
//
//   avg = (avg * (period - 1) + x) / period
//   rsi = 100 - 100 / (1 + avg_gain / avg_loss)
//
// A zero average loss yields exactly 100, including a perfectly flat market.
// =============================================================================

/// Compute the RSI series aligned to `values`.
///
/// The first `period` deltas (closes `0..=period`) seed the averages, so the
/// first defined index is `period`; everything before it is `None`.
///
/// # Edge cases
/// - `period == 0` => all `None`
/// - `values.len() < period + 1` => all `None` (need `period` deltas)
/// - Non-finite results stop the series.
pub fn rsi_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period + 1 {
        return out;
    }

    // --- Seed averages with the mean of the first `period` deltas -----------
    let (sum_gain, sum_loss) = values[..=period]
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold((0.0_f64, 0.0_f64), |(g, l), d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l - d)
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    match rsi_from_averages(avg_gain, avg_loss) {
        Some(rsi) => out[period] = Some(rsi),
        None => return out,
    }

    // --- Wilder's smoothing for subsequent values ---------------------------
    for i in period + 1..values.len() {
        let delta = values[i] - values[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => out[i] = Some(rsi),
            None => break,
        }
    }

    out
}

/// Convert average gain / average loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    if rsi.is_finite() {
        Some(rsi.clamp(0.0, 100.0))
    } else {
        None
    }
}
