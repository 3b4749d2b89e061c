// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value (index `period - 1`) is seeded with the SMA of the
// first `period` closes. Seeding with the first raw close is not supported.
// =============================================================================

/// Compute the EMA series aligned to `values`.
///
/// Index `i` holds `Some(ema)` for `i >= period - 1`; the warm-up window is
/// `None`.
///
/// # Edge cases
/// - `period == 0` => all `None` (division by zero guard)
/// - `values.len() < period` => all `None`
/// - Non-finite intermediate values stop the series; the remainder is `None`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let multiplier = 2.0 / (period + 1) as f64;

    // Seed: SMA of the first `period` values.
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return out;
    }
    out[period - 1] = Some(seed);

    let mut prev_ema = seed;
    for (i, &value) in values.iter().enumerate().skip(period) {
        let ema = value * multiplier + prev_ema * (1.0 - multiplier);
        if !ema.is_finite() {
            // Downstream consumers should not trust a broken series.
            break;
        }
        out[i] = Some(ema);
        prev_ema = ema;
    }

    out
}

/// EMA over a series whose leading entries are not yet available.
///
/// The leading `None`s are skipped (not treated as zero); the EMA is computed
/// over the contiguous run of defined values that follows, and the result is
/// placed back at the same offsets. Used for the MACD signal line.
pub fn ema_series_sparse(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];

    let Some(start) = values.iter().position(Option::is_some) else {
        return out;
    };
    let defined: Vec<f64> = values[start..].iter().map_while(|v| *v).collect();

    for (offset, ema) in ema_series(&defined, period).into_iter().enumerate() {
        out[start + offset] = ema;
    }
    out
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    // ---- ema_series ------------------------------------------------------

    #[test]
    fn ema_empty_input() {
        assert!(ema_series(&[], 5).is_empty());
    }

    #[test]
    fn ema_period_zero() {
        assert!(ema_series(&[1.0, 2.0, 3.0], 0).iter().all(Option::is_none));
    }

    #[test]
    fn ema_insufficient_data() {
        assert_eq!(ema_series(&[1.0, 2.0], 5), vec![None, None]);
    }

    #[test]
    fn ema_period_equals_length() {
        let ema = ema_series(&[2.0, 4.0, 6.0], 3);
        // Seed only: the SMA = (2+4+6)/3 = 4.0
        assert_eq!(ema[..2], [None, None]);
        assert!((ema[2].unwrap() - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_known_values() {
        // 5-period EMA of [1..=10]: SMA seed of first 5 = 3.0, multiplier = 1/3
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = ema_series(&closes, 5);
        assert!(ema[..4].iter().all(Option::is_none));

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        assert!((ema[4].unwrap() - expected).abs() < 1e-10);
        for (i, &c) in closes.iter().enumerate().skip(5) {
            expected = c * mult + expected * (1.0 - mult);
            let got = ema[i].unwrap();
            assert!((got - expected).abs() < 1e-10, "got {got}, expected {expected}");
        }
    }

    #[test]
    fn ema_constant_series_stays_constant() {
        let ema = ema_series(&[42.0; 50], 9);
        for v in ema.iter().skip(8) {
            assert!((v.unwrap() - 42.0).abs() < 1e-10);
        }
    }

    #[test]
    fn ema_handles_nan_in_input() {
        let ema = ema_series(&[1.0, 2.0, 3.0, f64::NAN, 5.0], 3);
        // Seed = 2.0 at index 2, then NaN => stop.
        assert_eq!(ema[2], Some(2.0));
        assert_eq!(ema[3], None);
        assert_eq!(ema[4], None);
    }

    // ---- ema_series_sparse -----------------------------------------------

    #[test]
    fn sparse_skips_leading_gaps() {
        let values = vec![None, None, Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
        let ema = ema_series_sparse(&values, 2);
        assert_eq!(ema[..3], [None, None, None]);
        // Seed at the second defined value: mean(1, 2) = 1.5
        assert!((ema[3].unwrap() - 1.5).abs() < 1e-10);
        assert!(ema[5].is_some());
    }

    #[test]
    fn sparse_all_missing() {
        assert!(ema_series_sparse(&[None, None], 2).iter().all(Option::is_none));
    }
}
