//! Threshold classification
//!
//! Everything here is pure: a current value and a baseline go in, a
//! severity comes out. A tier matches only when the current value crosses
//! both the relative threshold (`multiplier × baseline`) and the tier's
//! absolute floor. Baselines below the metric's minimum are raised to it
//! first, so that near-idle distributions do not produce huge ratios.

use crate::config::DetectionConfig;
use crate::models::{MetricName, Severity};

/// Classification with the numbers behind it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Matched tier
    pub severity: Severity,
    /// Baseline after the low-traffic guard
    pub effective_baseline: f64,
    /// Multiplier of the matched tier, or the warning multiplier when none matched
    pub multiplier: f64,
    /// `(current - effective_baseline) / effective_baseline × 100`
    pub percentage_change: f64,
}

/// Severity of `current` against `baseline`
pub fn classify(current: f64, baseline: f64, metric: MetricName, config: &DetectionConfig) -> Severity {
    evaluate(current, baseline, metric, config).severity
}

/// Classify and report the effective baseline, multiplier and change
pub fn evaluate(
    current: f64,
    baseline: f64,
    metric: MetricName,
    config: &DetectionConfig,
) -> Evaluation {
    let thresholds = config.thresholds(metric);
    let effective_baseline = baseline.max(thresholds.minimum_baseline);

    let (severity, multiplier) = if current >= config.critical_multiplier * effective_baseline
        && current >= thresholds.critical_absolute
    {
        (Severity::Critical, config.critical_multiplier)
    } else if current >= config.warning_multiplier * effective_baseline
        && current >= thresholds.warning_absolute
    {
        (Severity::Warning, config.warning_multiplier)
    } else {
        (Severity::None, config.warning_multiplier)
    };

    let percentage_change = if effective_baseline > 0.0 {
        (current - effective_baseline) / effective_baseline * 100.0
    } else {
        0.0
    };

    Evaluation {
        severity,
        effective_baseline,
        multiplier,
        percentage_change,
    }
}

/// Whether a distribution is too quiet to evaluate this period
pub fn is_small_distribution(requests: f64, bytes: f64, config: &DetectionConfig) -> bool {
    requests < config.min_requests && bytes < config.min_bytes
}

/// Severity of the alert to raise, given this cycle's classification and
/// the shared consecutive-violation count after updating it
///
/// Critical needs a critical classification and `critical_duration`
/// cycles; otherwise any violation reaching `warning_duration` raises a
/// warning.
pub fn alert_severity(classified: Severity, count: u32, config: &DetectionConfig) -> Option<Severity> {
    if classified == Severity::Critical && count >= config.critical_duration {
        Some(Severity::Critical)
    } else if classified >= Severity::Warning && count >= config.warning_duration {
        Some(Severity::Warning)
    } else {
        None
    }
}
