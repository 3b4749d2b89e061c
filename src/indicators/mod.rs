// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the chart indicators. Each
// primitive returns a series aligned index-for-index with its input, using
// `None` for the warm-up window so "not yet computable" never reads as zero.
//
// `compute_indicators` is the entry point: it takes a `ChronologicalBars`
// (oldest-first by construction) and the requested `IndicatorSet`, and
// dispatches every requested kind through its strategy function.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::market_data::{Bar, ChronologicalBars};

pub use bollinger::BollingerBands;
pub use macd::MacdValue;

// =============================================================================
// Indicator kinds
// =============================================================================

/// The closed set of supported indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Bollinger,
    Rsi,
    Macd,
}

/// Per-indicator annotation routine.
type Strategy = fn(&[f64], &IndicatorSettings, &mut [AnnotatedBar]);

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 5] = [
        IndicatorKind::Sma,
        IndicatorKind::Ema,
        IndicatorKind::Bollinger,
        IndicatorKind::Rsi,
        IndicatorKind::Macd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sma => "sma",
            Self::Ema => "ema",
            Self::Bollinger => "bollinger",
            Self::Rsi => "rsi",
            Self::Macd => "macd",
        }
    }

    fn strategy(self) -> Strategy {
        match self {
            Self::Sma => annotate_sma,
            Self::Ema => annotate_ema,
            Self::Bollinger => annotate_bollinger,
            Self::Rsi => annotate_rsi,
            Self::Macd => annotate_macd,
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown indicator '{0}' (expected one of sma, ema, bollinger, rsi, macd)")]
pub struct UnknownIndicator(pub String);

impl FromStr for IndicatorKind {
    type Err = UnknownIndicator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sma" => Ok(Self::Sma),
            "ema" => Ok(Self::Ema),
            "bollinger" | "bb" => Ok(Self::Bollinger),
            "rsi" => Ok(Self::Rsi),
            "macd" => Ok(Self::Macd),
            other => Err(UnknownIndicator(other.to_string())),
        }
    }
}

/// A set of requested indicators, iterated in a fixed order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorSet(BTreeSet<IndicatorKind>);

impl IndicatorSet {
    pub fn all() -> Self {
        IndicatorKind::ALL.into_iter().collect()
    }

    /// Parse a comma-separated list such as `"sma,ema,rsi"`. Empty segments
    /// are ignored.
    pub fn parse_list(list: &str) -> Result<Self, UnknownIndicator> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(IndicatorKind::from_str)
            .collect()
    }

    pub fn contains(&self, kind: IndicatorKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn insert(&mut self, kind: IndicatorKind) {
        self.0.insert(kind);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = IndicatorKind> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<IndicatorKind> for IndicatorSet {
    fn from_iter<I: IntoIterator<Item = IndicatorKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for IndicatorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.iter().map(|k| k.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

impl Serialize for IndicatorSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for IndicatorSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<IndicatorKind>::deserialize(deserializer).map(|kinds| kinds.into_iter().collect())
    }
}

// =============================================================================
// Settings
// =============================================================================

fn default_sma_period() -> usize {
    20
}

fn default_ema_period() -> usize {
    9
}

fn default_bollinger_period() -> usize {
    20
}

fn default_bollinger_std() -> f64 {
    2.0
}

fn default_rsi_period() -> usize {
    14
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

/// Look-back periods for every indicator. Periods are counted in bars of the
/// series handed to the engine, i.e. after density optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSettings {
    #[serde(default = "default_sma_period")]
    pub sma_period: usize,
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_std")]
    pub bollinger_std: f64,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            sma_period: default_sma_period(),
            ema_period: default_ema_period(),
            bollinger_period: default_bollinger_period(),
            bollinger_std: default_bollinger_std(),
            rsi_period: default_rsi_period(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
        }
    }
}

// =============================================================================
// Annotated bars
// =============================================================================

/// A bar plus whichever indicator values are defined at its index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedBar {
    #[serde(flatten)]
    pub bar: Bar,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bollinger: Option<BollingerBands>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macd: Option<MacdValue>,
}

impl From<Bar> for AnnotatedBar {
    fn from(bar: Bar) -> Self {
        Self {
            bar,
            sma: None,
            ema: None,
            bollinger: None,
            rsi: None,
            macd: None,
        }
    }
}

// =============================================================================
// Engine entry point
// =============================================================================

/// Annotate `bars` with the requested indicators using default periods.
pub fn compute_indicators(bars: &ChronologicalBars, indicators: &IndicatorSet) -> Vec<AnnotatedBar> {
    compute_indicators_with(bars, indicators, &IndicatorSettings::default())
}

/// Annotate `bars` with the requested indicators.
///
/// The output has the same length and order as the input. Insufficient
/// history never errors: the affected fields are simply `None`, and an empty
/// input yields an empty output.
pub fn compute_indicators_with(
    bars: &ChronologicalBars,
    indicators: &IndicatorSet,
    settings: &IndicatorSettings,
) -> Vec<AnnotatedBar> {
    let mut out: Vec<AnnotatedBar> = bars
        .as_slice()
        .iter()
        .cloned()
        .map(AnnotatedBar::from)
        .collect();
    if out.is_empty() {
        return out;
    }

    let closes = bars.closes();
    for kind in indicators.iter() {
        (kind.strategy())(&closes, settings, &mut out[..]);
    }
    out
}

fn fill<T>(out: &mut [AnnotatedBar], series: Vec<Option<T>>, set: impl Fn(&mut AnnotatedBar, T)) {
    for (bar, value) in out.iter_mut().zip(series) {
        if let Some(v) = value {
            set(bar, v);
        }
    }
}

fn annotate_sma(closes: &[f64], settings: &IndicatorSettings, out: &mut [AnnotatedBar]) {
    fill(out, sma::sma_series(closes, settings.sma_period), |b, v| {
        b.sma = Some(v)
    });
}

fn annotate_ema(closes: &[f64], settings: &IndicatorSettings, out: &mut [AnnotatedBar]) {
    fill(out, ema::ema_series(closes, settings.ema_period), |b, v| {
        b.ema = Some(v)
    });
}

fn annotate_bollinger(closes: &[f64], settings: &IndicatorSettings, out: &mut [AnnotatedBar]) {
    let series =
        bollinger::bollinger_series(closes, settings.bollinger_period, settings.bollinger_std);
    fill(out, series, |b, v| b.bollinger = Some(v));
}

fn annotate_rsi(closes: &[f64], settings: &IndicatorSettings, out: &mut [AnnotatedBar]) {
    fill(out, rsi::rsi_series(closes, settings.rsi_period), |b, v| {
        b.rsi = Some(v)
    });
}

fn annotate_macd(closes: &[f64], settings: &IndicatorSettings, out: &mut [AnnotatedBar]) {
    let series = macd::macd_series(
        closes,
        settings.macd_fast,
        settings.macd_slow,
        settings.macd_signal,
    );
    fill(out, series, |b, v| b.macd = Some(v));
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn flat_daily_bars(n: usize, price: f64) -> ChronologicalBars {
        let bars = (0..n)
            .map(|i| Bar::new(price, price, price, price, 1_000.0, i as i64 * 86_400_000))
            .collect();
        ChronologicalBars::from_oldest_first(bars).unwrap()
    }

    fn wavy_bars(n: usize) -> ChronologicalBars {
        let bars = (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.45).sin() * 6.0 + ((i * 17) % 5) as f64;
                Bar::new(close, close + 1.0, close - 1.0, close, 500.0, i as i64 * 60_000)
            })
            .collect();
        ChronologicalBars::from_oldest_first(bars).unwrap()
    }

    #[test]
    fn parse_list_accepts_known_names() {
        let set = IndicatorSet::parse_list("sma, EMA,,macd").unwrap();
        assert!(set.contains(IndicatorKind::Sma));
        assert!(set.contains(IndicatorKind::Ema));
        assert!(set.contains(IndicatorKind::Macd));
        assert!(!set.contains(IndicatorKind::Rsi));
        assert_eq!(set.to_string(), "sma,ema,macd");
    }

    #[test]
    fn parse_list_rejects_unknown() {
        let err = IndicatorSet::parse_list("sma,vwap").unwrap_err();
        assert_eq!(err, UnknownIndicator("vwap".into()));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let out = compute_indicators(&ChronologicalBars::default(), &IndicatorSet::all());
        assert!(out.is_empty());
    }

    #[test]
    fn output_is_aligned_with_input() {
        let bars = wavy_bars(80);
        let out = compute_indicators(&bars, &IndicatorSet::all());
        assert_eq!(out.len(), bars.len());
        for (a, b) in out.iter().zip(bars.as_slice()) {
            assert_eq!(&a.bar, b);
        }
    }

    #[test]
    fn only_requested_indicators_are_filled() {
        let bars = wavy_bars(80);
        let set: IndicatorSet = [IndicatorKind::Rsi].into_iter().collect();
        let out = compute_indicators(&bars, &set);
        assert!(out.iter().all(|b| b.sma.is_none() && b.ema.is_none() && b.macd.is_none()));
        assert!(out[79].rsi.is_some());
    }

    #[test]
    fn flat_thirty_day_scenario() {
        let bars = flat_daily_bars(30, 100.0);
        let out = compute_indicators(&bars, &IndicatorSet::all());

        for (i, bar) in out.iter().enumerate() {
            if i < 19 {
                assert!(bar.sma.is_none(), "sma defined at {i}");
            } else {
                assert_eq!(bar.sma, Some(100.0));
            }
            if i < 14 {
                assert!(bar.rsi.is_none());
            } else {
                assert_eq!(bar.rsi, Some(100.0));
            }
            if let Some(ema) = bar.ema {
                assert!((ema - 100.0).abs() < 1e-10);
            }
            if let Some(macd) = bar.macd {
                assert!(macd.macd.abs() < 1e-9);
                if let Some(h) = macd.histogram {
                    assert!(h.abs() < 1e-9);
                }
            }
        }
        assert!(out[8].ema.is_some());
        assert!(out[25].macd.is_some());
    }

    #[test]
    fn bollinger_middle_matches_sma() {
        let bars = wavy_bars(60);
        let set: IndicatorSet = [IndicatorKind::Sma, IndicatorKind::Bollinger].into_iter().collect();
        for bar in compute_indicators(&bars, &set) {
            match (bar.sma, bar.bollinger) {
                (Some(sma), Some(bb)) => {
                    assert!((sma - bb.middle).abs() < 1e-12);
                    assert!(bb.upper >= bb.middle && bb.middle >= bb.lower);
                }
                (None, None) => {}
                other => panic!("sma and bollinger disagree on warm-up: {other:?}"),
            }
        }
    }

    #[test]
    fn warm_up_fields_are_omitted_from_json() {
        let bars = flat_daily_bars(3, 10.0);
        let out = compute_indicators(&bars, &IndicatorSet::all());
        let json = serde_json::to_value(&out[0]).unwrap();
        assert!(json.get("sma").is_none());
        assert!(json.get("rsi").is_none());
        assert_eq!(json["close"], 10.0);
    }

    #[test]
    fn custom_periods_are_respected() {
        let bars = flat_daily_bars(10, 5.0);
        let settings = IndicatorSettings {
            sma_period: 3,
            ..IndicatorSettings::default()
        };
        let set: IndicatorSet = [IndicatorKind::Sma].into_iter().collect();
        let out = compute_indicators_with(&bars, &set, &settings);
        assert!(out[1].sma.is_none());
        assert_eq!(out[2].sma, Some(5.0));
    }
}
