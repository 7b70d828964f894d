//! Traffic metric models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tracked CDN traffic metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricName {
    /// Request count in the period
    Requests,
    /// Bytes served to clients in the period
    Bytes,
}

impl MetricName {
    /// Every metric evaluated per distribution
    pub const ALL: [MetricName; 2] = [MetricName::Requests, MetricName::Bytes];

    /// Stable lowercase name used in keys and payloads
    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::Requests => "requests",
            MetricName::Bytes => "bytes",
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open observation window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Window start
    pub start: DateTime<Utc>,
    /// Window end
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// The window of `length` ending at `end`
    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: end - length,
            end,
        }
    }

    /// The clock-aligned period of `length` that contains `at`
    ///
    /// Periods are aligned to the Unix epoch, so with a 15 minute length
    /// they start on :00, :15, :30 and :45.
    pub fn period_containing(at: DateTime<Utc>, length: Duration) -> Self {
        let secs = length.num_seconds().max(1);
        let into_period = Duration::seconds(at.timestamp().rem_euclid(secs))
            + Duration::nanoseconds(i64::from(at.timestamp_subsec_nanos()));
        let start = at - into_period;
        Self {
            start,
            end: start + length,
        }
    }

    /// Window length
    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

/// One evaluation window's observation for a distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Distribution the sample belongs to
    pub distribution_id: String,
    /// Metric observed
    pub metric: MetricName,
    /// Observed value (sum over the period)
    pub value: f64,
    /// Period start
    pub period_start: DateTime<Utc>,
    /// Period end
    pub period_end: DateTime<Utc>,
}

/// Trailing-window reference value for a distribution metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Distribution the baseline belongs to
    pub distribution_id: String,
    /// Metric the baseline describes
    pub metric: MetricName,
    /// Mean per-period value over the trailing window
    pub average: f64,
    /// When the baseline was computed
    pub computed_at: DateTime<Utc>,
}

impl Baseline {
    /// Average a series of per-period values; an empty series yields zero
    pub fn from_series(
        distribution_id: impl Into<String>,
        metric: MetricName,
        values: &[f64],
        computed_at: DateTime<Utc>,
    ) -> Self {
        let average = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };

        Self {
            distribution_id: distribution_id.into(),
            metric,
            average,
            computed_at,
        }
    }
}
