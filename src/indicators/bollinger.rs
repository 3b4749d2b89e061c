// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ). σ is the population standard deviation of the
// closes in the same trailing window (divide by `period`, not `period - 1`).
//
// Because σ >= 0, upper >= middle >= lower holds for every defined index.

use serde::Serialize;

use super::sma::sma_series;

/// Bollinger values for a single bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Calculate Bollinger Bands aligned to `values`.
///
/// `None` inside the SMA warm-up window (`i < period - 1`) and wherever the
/// middle band could not be computed.
pub fn bollinger_series(values: &[f64], period: usize, num_std: f64) -> Vec<Option<BollingerBands>> {
    let middles = sma_series(values, period);

    middles
        .iter()
        .enumerate()
        .map(|(i, middle)| {
            let middle = (*middle)?;
            let window = &values[i + 1 - period..=i];
            let variance =
                window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
            let std_dev = variance.sqrt();
            if !std_dev.is_finite() {
                return None;
            }
            Some(BollingerBands {
                upper: middle + num_std * std_dev,
                middle,
                lower: middle - num_std * std_dev,
            })
        })
        .collect()
}
