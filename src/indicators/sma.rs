// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// SMA_t = (close_{t-p+1} + ... + close_t) / p
//
// Computed with a running window sum: the value leaving the window is
// subtracted and the value entering it is added, so the whole series costs a
// single linear pass regardless of the period.
// =============================================================================

/// Compute the SMA series aligned to `values`.
///
/// Index `i` holds `Some(mean)` for `i >= period - 1` and `None` inside the
/// warm-up window.
///
/// # Edge cases
/// - `period == 0` or `values.len() < period` => all `None`
/// - A non-finite mean stops the series; later indices stay `None`.
pub fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let period_f = period as f64;
    let mut window_sum = 0.0_f64;

    for (i, &value) in values.iter().enumerate() {
        window_sum += value;
        if i >= period {
            window_sum -= values[i - period];
        }
        if i + 1 < period {
            continue;
        }

        let mean = window_sum / period_f;
        if !mean.is_finite() {
            break;
        }
        out[i] = Some(mean);
    }

    out
}
