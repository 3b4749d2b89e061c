// =============================================================================
// OHLCV Bars — wire format and chronological ordering
// =============================================================================
//
// The market-data API returns aggregate bars with single-letter keys
// (`o`, `h`, `l`, `c`, `v`, `t`) and, depending on the request, newest-first.
// Every analytic in this crate walks bars oldest-first, so the ordering is
// carried in the type: `ChronologicalBars` can only be built through a
// constructor that checks (or establishes) ascending timestamps.
// =============================================================================

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Bar timestamp as delivered by the source: epoch milliseconds or an ISO
/// date / datetime string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BarTime {
    Epoch(i64),
    Iso(String),
}

impl BarTime {
    /// Resolve to epoch milliseconds (UTC). `None` when an ISO string cannot
    /// be read.
    pub fn epoch_millis(&self) -> Option<i64> {
        match self {
            Self::Epoch(ms) => Some(*ms),
            Self::Iso(s) => parse_iso_millis(s),
        }
    }
}

impl From<i64> for BarTime {
    fn from(ms: i64) -> Self {
        Self::Epoch(ms)
    }
}

impl std::fmt::Display for BarTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epoch(ms) => write!(f, "{ms}"),
            Self::Iso(s) => write!(f, "{s}"),
        }
    }
}

/// A single OHLCV sample for one fixed interval. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(alias = "o")]
    pub open: f64,
    #[serde(alias = "h")]
    pub high: f64,
    #[serde(alias = "l")]
    pub low: f64,
    #[serde(alias = "c")]
    pub close: f64,
    #[serde(alias = "v")]
    pub volume: f64,
    #[serde(alias = "t")]
    pub timestamp: BarTime,
}

impl Bar {
    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: f64, timestamp_ms: i64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
            timestamp: BarTime::Epoch(timestamp_ms),
        }
    }

    /// `true` when every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }
}

// ---------------------------------------------------------------------------
// ChronologicalBars — oldest-first sequence, enforced at construction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("bar {index} has an unreadable timestamp: {timestamp}")]
    UnreadableTimestamp { index: usize, timestamp: String },
    #[error("bar {index} at {current} precedes the bar before it at {previous}")]
    OutOfOrder {
        index: usize,
        previous: i64,
        current: i64,
    },
}

/// A bar sequence guaranteed to be in ascending timestamp order (ties
/// allowed). Indicator computation only accepts this type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChronologicalBars(Vec<Bar>);

impl ChronologicalBars {
    /// Accept a sequence that is already oldest-first.
    pub fn from_oldest_first(bars: Vec<Bar>) -> Result<Self, OrderError> {
        let mut previous: Option<i64> = None;
        for (index, bar) in bars.iter().enumerate() {
            let current =
                bar.timestamp
                    .epoch_millis()
                    .ok_or_else(|| OrderError::UnreadableTimestamp {
                        index,
                        timestamp: bar.timestamp.to_string(),
                    })?;
            if let Some(prev) = previous {
                if current < prev {
                    return Err(OrderError::OutOfOrder {
                        index,
                        previous: prev,
                        current,
                    });
                }
            }
            previous = Some(current);
        }
        Ok(Self(bars))
    }

    /// Accept a newest-first sequence (the shape `sort=desc` responses come
    /// in) by reversing it before validation.
    pub fn from_newest_first(mut bars: Vec<Bar>) -> Result<Self, OrderError> {
        bars.reverse();
        Self::from_oldest_first(bars)
    }

    /// Build from a subsequence of an already-validated series. Sampling
    /// never reorders, so no re-validation is needed.
    pub(crate) fn from_sampled(bars: Vec<Bar>) -> Self {
        Self(bars)
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.0.iter().map(|b| b.close).collect()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.0.last()
    }

    pub fn into_inner(self) -> Vec<Bar> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_iso_millis(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
