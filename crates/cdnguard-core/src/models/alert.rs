//! Alert data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MetricName;

/// Alert severity tier
///
/// Variants are declared in ascending order so the derived ordering gives
/// `Critical > Warning > None`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Within normal range
    #[default]
    None,
    /// Sustained elevated traffic
    Warning,
    /// Severe traffic anomaly
    Critical,
}

impl Severity {
    /// Whether this tier is a violation
    pub fn is_violation(self) -> bool {
        self != Severity::None
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::None => write!(f, "none"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Identity shared by the violation counter and the sent-alert record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViolationKey {
    /// Owning account
    pub account_id: String,
    /// Evaluated distribution
    pub distribution_id: String,
    /// Evaluated metric
    pub metric: MetricName,
}

impl ViolationKey {
    /// Build a key from its parts
    pub fn new(
        account_id: impl Into<String>,
        distribution_id: impl Into<String>,
        metric: MetricName,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            distribution_id: distribution_id.into(),
            metric,
        }
    }
}

impl std::fmt::Display for ViolationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}#{}", self.account_id, self.distribution_id, self.metric)
    }
}

/// An alert candidate produced by the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Counter and dedup identity
    pub key: ViolationKey,

    /// Owning account display name
    pub account_name: String,

    /// Owning account email
    pub account_email: String,

    /// Severity that fired
    pub severity: Severity,

    /// Observed value for the current period
    pub current_value: f64,

    /// Trailing baseline average
    pub baseline_value: f64,

    /// Multiplier of the tier that fired
    pub multiplier: f64,

    /// Change relative to the baseline, in percent
    pub percentage_change: f64,

    /// Consecutive violating cycles at the time of firing
    pub consecutive_count: u32,

    /// When the alert was produced
    pub detected_at: DateTime<Utc>,
}

impl Alert {
    /// Value the current sample was compared against (`baseline × multiplier`)
    pub fn threshold_value(&self) -> f64 {
        self.baseline_value * self.multiplier
    }
}
