//! Per-group evaluation
//!
//! For each account: list its distributions, fetch the current period for
//! all of them in one batched query, then evaluate every
//! (distribution, metric) pair under the distribution pool. A failing
//! metric only skips that metric; a failing listing or query fails the
//! account, which is then recorded in the failed-account store.
//!
//! Counters move once per clock-aligned period, so re-running a cycle
//! inside the same period does not count as another consecutive violation.
//! Small distributions are still evaluated, as `none`, so their counters
//! keep decaying rather than being left untouched.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::evaluator::{alert_severity, evaluate, is_small_distribution};
use crate::accounts::FailedAccountStore;
use crate::alerting::{AlertDedupStore, DispatchOutcome, Dispatcher};
use crate::cache::BaselineCache;
use crate::clock::Clock;
use crate::config::DetectionConfig;
use crate::counter::ViolationCounterStore;
use crate::error::{Error, Result};
use crate::models::{
    Account, Alert, Baseline, Distribution, MetricName, Severity, TimeRange, ViolationKey,
};
use crate::retry::{retry, RetryPolicy};
use crate::sources::MetricsSource;
use crate::telemetry;

/// An account whose processing failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountFailure {
    /// Account identifier
    pub account_id: String,
    /// Error text
    pub error: String,
}

/// What one group's run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupReport {
    /// Accounts fully evaluated
    pub accounts_processed: usize,
    /// Distributions evaluated across those accounts
    pub distributions_evaluated: usize,
    /// Metrics skipped because of a baseline or store failure
    pub metrics_skipped: usize,
    /// Alert candidates suppressed by dedup
    pub alerts_suppressed: usize,
    /// Accounts that failed
    pub failures: Vec<AccountFailure>,
    /// Delivery results
    pub dispatches: Vec<DispatchOutcome>,
}

impl GroupReport {
    fn absorb(&mut self, account: AccountReport) {
        self.accounts_processed += 1;
        self.distributions_evaluated += account.distributions;
        self.metrics_skipped += account.metrics_skipped;
        self.alerts_suppressed += account.suppressed;
        self.dispatches.extend(account.dispatches);
    }
}

#[derive(Debug, Default)]
struct AccountReport {
    distributions: usize,
    metrics_skipped: usize,
    suppressed: usize,
    dispatches: Vec<DispatchOutcome>,
}

#[derive(Debug, Default)]
struct DistributionReport {
    candidates: Vec<Alert>,
    suppressed: usize,
    metrics_skipped: usize,
}

/// Stores and services a worker needs
#[allow(missing_docs)]
pub struct WorkerDeps {
    pub metrics: Arc<dyn MetricsSource>,
    pub baselines: Arc<BaselineCache>,
    pub counters: Arc<ViolationCounterStore>,
    pub dedup: Arc<AlertDedupStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub failed: Arc<FailedAccountStore>,
    pub clock: Arc<dyn Clock>,
}

/// Evaluates groups of accounts
pub struct Worker {
    deps: WorkerDeps,
    detection: DetectionConfig,
    period: chrono::Duration,
    baseline_window: chrono::Duration,
    retry: RetryPolicy,
    max_workers: usize,
    dist_max_workers: usize,
}

impl Worker {
    /// Create a worker; `max_workers` bounds accounts per group and
    /// `dist_max_workers` bounds distributions per account
    pub fn new(
        deps: WorkerDeps,
        detection: DetectionConfig,
        retry: RetryPolicy,
        max_workers: usize,
        dist_max_workers: usize,
    ) -> Result<Self> {
        let period = chrono::Duration::from_std(detection.period)
            .map_err(|e| Error::config(format!("detection.period out of range: {e}")))?;
        let baseline_window = chrono::Duration::from_std(detection.baseline_window)
            .map_err(|e| Error::config(format!("detection.baseline_window out of range: {e}")))?;

        Ok(Self {
            deps,
            detection,
            period,
            baseline_window,
            retry,
            max_workers: max_workers.max(1),
            dist_max_workers: dist_max_workers.max(1),
        })
    }

    /// Evaluate every account of a group
    #[tracing::instrument(skip_all, fields(group = index, accounts = group.len()))]
    pub async fn process_group(&self, index: usize, group: Vec<Account>) -> GroupReport {
        let results: Vec<(String, Result<AccountReport>)> = stream::iter(group)
            .map(|account| async move {
                let result = self.process_account(&account).await;
                (account.id, result)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let mut report = GroupReport::default();
        for (account_id, result) in results {
            match result {
                Ok(account) => report.absorb(account),
                Err(e) => {
                    let error = e.to_string();
                    if let Err(store_err) = self.deps.failed.record(&account_id, &error).await {
                        warn!(%account_id, error = %store_err, "Could not record account failure");
                    }
                    report.failures.push(AccountFailure { account_id, error });
                }
            }
        }

        info!(
            processed = report.accounts_processed,
            failed = report.failures.len(),
            dispatched = report.dispatches.len(),
            suppressed = report.alerts_suppressed,
            "Group finished"
        );
        report
    }

    async fn process_account(&self, account: &Account) -> Result<AccountReport> {
        let distributions = retry(&self.retry, "list_distributions", || {
            self.deps.metrics.list_distributions(&account.id)
        })
        .await?;

        if distributions.is_empty() {
            debug!(account_id = %account.id, "No distributions");
            return Ok(AccountReport::default());
        }

        let now = self.deps.clock.now();
        let range = TimeRange::ending_at(now, self.period);
        let period_start = TimeRange::period_containing(now, self.period).start;
        let ids: Vec<String> = distributions.iter().map(|d| d.id.clone()).collect();
        let samples = retry(&self.retry, "query_batched", || {
            self.deps
                .metrics
                .query_batched(&account.id, &ids, &MetricName::ALL, range)
        })
        .await?;

        let mut current: HashMap<(String, MetricName), f64> = HashMap::new();
        for sample in samples {
            *current
                .entry((sample.distribution_id, sample.metric))
                .or_insert(0.0) += sample.value;
        }
        let current = &current;

        let reports: Vec<DistributionReport> = stream::iter(distributions.iter().cloned())
            .map(|dist| async move {
                self.process_distribution(account, &dist, current, range, period_start)
                    .await
            })
            .buffer_unordered(self.dist_max_workers)
            .collect()
            .await;

        let mut report = AccountReport {
            distributions: distributions.len(),
            ..AccountReport::default()
        };
        let mut candidates = Vec::new();
        for dist in reports {
            report.metrics_skipped += dist.metrics_skipped;
            report.suppressed += dist.suppressed;
            candidates.extend(dist.candidates);
        }

        report.dispatches = self.deps.dispatcher.dispatch_all(candidates).await;
        Ok(report)
    }

    async fn process_distribution(
        &self,
        account: &Account,
        dist: &Distribution,
        current: &HashMap<(String, MetricName), f64>,
        range: TimeRange,
        period_start: DateTime<Utc>,
    ) -> DistributionReport {
        let value_of = |metric: MetricName| {
            current
                .get(&(dist.id.clone(), metric))
                .copied()
                .unwrap_or(0.0)
        };
        let small = is_small_distribution(
            value_of(MetricName::Requests),
            value_of(MetricName::Bytes),
            &self.detection,
        );

        let mut report = DistributionReport::default();
        for metric in MetricName::ALL {
            let key = ViolationKey::new(&account.id, &dist.id, metric);
            match self
                .process_metric(account, &key, value_of(metric), small, range, period_start)
                .await
            {
                Ok(Some(alert)) => {
                    if self.deps.dedup.should_send(&key, alert.severity).await {
                        report.candidates.push(alert);
                    } else {
                        metrics::counter!(telemetry::ALERTS_SUPPRESSED_TOTAL).increment(1);
                        info!(key = %key, severity = %alert.severity, "Alert suppressed");
                        report.suppressed += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping metric this cycle");
                    report.metrics_skipped += 1;
                }
            }
        }
        report
    }

    async fn process_metric(
        &self,
        account: &Account,
        key: &ViolationKey,
        current: f64,
        small: bool,
        range: TimeRange,
        period_start: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let evaluation = if small {
            None
        } else {
            let baseline = self.baseline(key, range).await?;
            Some(evaluate(current, baseline.average, key.metric, &self.detection))
        };
        let severity = evaluation.map_or(Severity::None, |e| e.severity);

        let count = if severity.is_violation() {
            self.deps.counters.increment(key, period_start).await?
        } else {
            self.deps.counters.decrement(key, period_start).await?
        };

        debug!(
            key = %key,
            current,
            %severity,
            count,
            small,
            "Evaluated metric"
        );

        let (Some(evaluation), Some(fire)) =
            (evaluation, alert_severity(severity, count, &self.detection))
        else {
            return Ok(None);
        };

        let multiplier = match fire {
            Severity::Critical => self.detection.critical_multiplier,
            _ => self.detection.warning_multiplier,
        };

        Ok(Some(Alert {
            key: key.clone(),
            account_name: account.name.clone(),
            account_email: account.email.clone(),
            severity: fire,
            current_value: current,
            baseline_value: evaluation.effective_baseline,
            multiplier,
            percentage_change: evaluation.percentage_change,
            consecutive_count: count,
            detected_at: self.deps.clock.now(),
        }))
    }

    /// Baseline over the window preceding the current period
    async fn baseline(&self, key: &ViolationKey, current: TimeRange) -> Result<Baseline> {
        self.deps
            .baselines
            .get_or_refresh(key, || async {
                let window = TimeRange::ending_at(current.start, self.baseline_window);
                let values = retry(&self.retry, "query_history", || {
                    self.deps.metrics.query_history(
                        &key.account_id,
                        &key.distribution_id,
                        key.metric,
                        window,
                        self.detection.period,
                    )
                })
                .await?;
                Ok(Baseline::from_series(
                    &key.distribution_id,
                    key.metric,
                    &values,
                    self.deps.clock.now(),
                ))
            })
            .await
    }
}
