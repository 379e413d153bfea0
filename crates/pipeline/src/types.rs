//! Shared value types for the pipeline status domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. scores are finite and non-negative)
//! and appear directly in event payloads and snapshots.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// Overall score attached to a finished pipeline (e.g. `82` on a 0–100 scale).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    /// Creates a [`Score`], returning `None` if `value` is negative, infinite,
    /// or NaN.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 0.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the score as an `f64`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Score {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("invalid score {value}"))
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> f64 {
        score.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Wall-clock time a worker took, in milliseconds, as reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DurationMs(u64);

impl DurationMs {
    /// Creates a [`DurationMs`] from a raw millisecond count.
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the underlying millisecond count.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DurationMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Encoded on the wire as milliseconds since the Unix epoch, which is what
/// publishers put in event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(#[serde(with = "chrono::serde::ts_milliseconds")] DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from milliseconds since the Unix epoch.
    ///
    /// Returns `None` if the value is outside the representable range.
    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_rejects_negative_and_nan() {
        assert!(Score::new(-1.0).is_none());
        assert!(Score::new(f64::NAN).is_none());
        assert_eq!(Score::new(82.0).unwrap().as_f64(), 82.0);
    }

    #[test]
    fn timestamp_reads_epoch_millis() {
        let ts: Timestamp = serde_json::from_str("1700000000000").unwrap();
        assert_eq!(ts, Timestamp::from_millis(1_700_000_000_000).unwrap());
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000000");
    }
}
