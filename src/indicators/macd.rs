// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   macd_line = EMA(fast) - EMA(slow)         defined once both EMAs are
//   signal    = EMA(signal) of macd_line      seeded from the first `signal`
//                                             defined MACD values
//   histogram = macd_line - signal
//
// Defaults: fast 12, slow 26, signal 9.

use serde::Serialize;

use super::ema::{ema_series, ema_series_sparse};

/// MACD values for a single bar. The line appears first; signal and histogram
/// follow once the signal EMA has warmed up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdValue {
    pub macd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<f64>,
}

/// Compute the MACD series aligned to `values`.
///
/// With the default periods the line is defined from index 25 and the signal /
/// histogram from index 33.
pub fn macd_series(
    values: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<Option<MacdValue>> {
    let fast_ema = ema_series(values, fast);
    let slow_ema = ema_series(values, slow);

    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema_series_sparse(&line, signal);

    line.iter()
        .zip(signal_line)
        .map(|(macd, signal)| {
            let macd = (*macd)?;
            Some(MacdValue {
                macd,
                signal,
                histogram: signal.map(|s| macd - s),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_warm_up_windows() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.4).sin()).collect();
        let series = macd_series(&closes, 12, 26, 9);
        assert!(series[..25].iter().all(Option::is_none));

        let first = series[25].unwrap();
        assert!(first.signal.is_none());
        assert!(series[32].unwrap().histogram.is_none());

        let warmed = series[33].unwrap();
        assert!(warmed.signal.is_some());
        let hist = warmed.histogram.unwrap();
        assert!((hist - (warmed.macd - warmed.signal.unwrap())).abs() < 1e-12);
    }

    #[test]
    fn macd_line_is_ema_difference() {
        let closes: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        let fast = ema_series(&closes, 12);
        let slow = ema_series(&closes, 26);
        let series = macd_series(&closes, 12, 26, 9);
        for i in 25..40 {
            let expected = fast[i].unwrap() - slow[i].unwrap();
            assert!((series[i].unwrap().macd - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let series = macd_series(&[50.0; 60], 12, 26, 9);
        for value in series.into_iter().flatten() {
            assert!(value.macd.abs() < 1e-9);
            if let Some(h) = value.histogram {
                assert!(h.abs() < 1e-9);
            }
        }
    }

    #[test]
    fn macd_short_input() {
        assert!(macd_series(&[1.0; 10], 12, 26, 9).iter().all(Option::is_none));
    }
}
