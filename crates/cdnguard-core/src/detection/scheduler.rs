//! Cycle scheduling
//!
//! A cycle lists the active accounts, splits them into fixed-size groups
//! and runs one worker task per group, at most `max_workers` at a time.
//! The whole cycle is bounded by `run_deadline`; groups still running at
//! the deadline are aborted. Every store write is self-contained, so an
//! aborted group leaves nothing half-written that the next cycle cannot
//! re-evaluate.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::worker::{AccountFailure, GroupReport, Worker, WorkerDeps};
use crate::accounts::{AccountDirectory, FailedAccountStore};
use crate::alerting::{AlertDedupStore, DispatchOutcome, Dispatcher, MessageChannel, MessageTemplate};
use crate::cache::{AccountsCache, BaselineCache};
use crate::clock::Clock;
use crate::config::Config;
use crate::counter::ViolationCounterStore;
use crate::error::Result;
use crate::models::Account;
use crate::retry::RetryPolicy;
use crate::sources::{MetricsSource, OrganizationSource};
use crate::store::{KvStore, Table};
use crate::telemetry;

/// Split `items` into consecutive groups of at most `group_size`,
/// preserving order
pub fn partition<T: Clone>(items: &[T], group_size: usize) -> Vec<Vec<T>> {
    items.chunks(group_size.max(1)).map(<[T]>::to_vec).collect()
}

/// Summary of one scheduling cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Unique per cycle, also logged
    pub cycle_id: Uuid,
    /// Clock time at cycle start
    pub started_at: DateTime<Utc>,
    /// Wall time spent
    pub elapsed_ms: u64,
    /// Active accounts listed
    pub accounts_total: usize,
    /// Groups spawned
    pub groups_total: usize,
    /// Groups that ran to completion
    pub groups_completed: usize,
    /// Groups whose task panicked or could not be joined
    pub groups_failed: usize,
    /// Groups cut off by the run deadline
    pub groups_abandoned: usize,
    /// Whether the run deadline fired
    pub deadline_exceeded: bool,
    /// Accounts fully evaluated
    pub accounts_processed: usize,
    /// Distributions evaluated
    pub distributions_evaluated: usize,
    /// Metrics skipped after a baseline or store failure
    pub metrics_skipped: usize,
    /// Per-account failures
    pub failures: Vec<AccountFailure>,
    /// Alerts delivered
    pub alerts_dispatched: usize,
    /// Alerts whose delivery failed after retries
    pub alerts_failed: usize,
    /// Alerts suppressed by dedup
    pub alerts_suppressed: usize,
    /// Every delivery outcome
    pub dispatches: Vec<DispatchOutcome>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at,
            elapsed_ms: 0,
            accounts_total: 0,
            groups_total: 0,
            groups_completed: 0,
            groups_failed: 0,
            groups_abandoned: 0,
            deadline_exceeded: false,
            accounts_processed: 0,
            distributions_evaluated: 0,
            metrics_skipped: 0,
            failures: Vec::new(),
            alerts_dispatched: 0,
            alerts_failed: 0,
            alerts_suppressed: 0,
            dispatches: Vec::new(),
        }
    }

    fn merge(&mut self, group: GroupReport) {
        self.groups_completed += 1;
        self.accounts_processed += group.accounts_processed;
        self.distributions_evaluated += group.distributions_evaluated;
        self.metrics_skipped += group.metrics_skipped;
        self.alerts_suppressed += group.alerts_suppressed;
        self.failures.extend(group.failures);
        for outcome in group.dispatches {
            if outcome.is_delivered() {
                self.alerts_dispatched += 1;
            } else {
                self.alerts_failed += 1;
            }
            self.dispatches.push(outcome);
        }
    }
}

/// Collaborators injected into the pipeline
#[allow(missing_docs)]
pub struct Collaborators {
    pub store: Arc<dyn KvStore>,
    pub organization: Arc<dyn OrganizationSource>,
    pub metrics: Arc<dyn MetricsSource>,
    pub channel: Arc<dyn MessageChannel>,
    pub clock: Arc<dyn Clock>,
}

/// Drives detection cycles
pub struct Scheduler {
    directory: AccountDirectory,
    worker: Arc<Worker>,
    failed: Arc<FailedAccountStore>,
    clock: Arc<dyn Clock>,
    group_size: usize,
    max_workers: usize,
    run_deadline: Duration,
    interval: Duration,
}

impl Scheduler {
    /// Wire the whole pipeline from configuration
    pub fn from_config(config: &Config, parts: Collaborators) -> Result<Self> {
        let stores = &config.stores;
        let table = |name: &str, ttl: Duration| Table::new(parts.store.clone(), name, ttl);
        let clock = parts.clock;
        let retry = RetryPolicy::from_schedule(&config.schedule);

        let failed = Arc::new(FailedAccountStore::new(
            table(&stores.tables.failed_accounts, stores.ttls.failed_accounts),
            clock.clone(),
        ));
        let dedup = Arc::new(AlertDedupStore::new(
            table(&stores.tables.sent_alerts, stores.ttls.sent_alerts),
            clock.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            parts.channel,
            dedup.clone(),
            MessageTemplate::from_config(&config.channel),
            config.channel.target_id(),
            retry.clone(),
            config.concurrency.alert_max_workers,
        ));

        let directory = AccountDirectory::new(
            parts.organization,
            AccountsCache::new(
                table(&stores.tables.cache, stores.ttls.accounts_cache),
                clock.clone(),
            ),
            failed.clone(),
            retry.clone(),
        );

        let deps = WorkerDeps {
            metrics: parts.metrics,
            baselines: Arc::new(BaselineCache::new(
                table(&stores.tables.cache, stores.ttls.baseline_cache),
                clock.clone(),
            )),
            counters: Arc::new(ViolationCounterStore::new(
                table(&stores.tables.counters, stores.ttls.counters),
                clock.clone(),
            )),
            dedup,
            dispatcher,
            failed: failed.clone(),
            clock: clock.clone(),
        };
        let worker = Worker::new(
            deps,
            config.detection.clone(),
            retry,
            config.concurrency.max_workers,
            config.concurrency.dist_max_workers,
        )?;

        Ok(Self {
            directory,
            worker: Arc::new(worker),
            failed,
            clock,
            group_size: config.concurrency.group_size.max(1),
            max_workers: config.concurrency.max_workers.max(1),
            run_deadline: config.schedule.run_deadline,
            interval: config.schedule.interval,
        })
    }

    /// Run one detection cycle
    ///
    /// Fails only when no account list can be produced at all; every
    /// per-account, per-metric and per-alert failure lands in the report.
    #[tracing::instrument(skip_all)]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::new(self.clock.now());

        let accounts = self.directory.list_active_accounts().await?;
        let groups = partition(&accounts, self.group_size);
        report.accounts_total = accounts.len();
        report.groups_total = groups.len();

        info!(
            cycle_id = %report.cycle_id,
            accounts = accounts.len(),
            groups = groups.len(),
            "Starting cycle"
        );

        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        for (index, group) in groups.into_iter().enumerate() {
            let worker = Arc::clone(&self.worker);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let ids: Vec<String> = group.iter().map(|a: &Account| a.id.clone()).collect();
                let outcome = AssertUnwindSafe(worker.process_group(index, group))
                    .catch_unwind()
                    .await;
                (index, ids, outcome)
            });
        }

        let deadline = tokio::time::sleep(self.run_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok((_, _, Ok(group)))) => report.merge(group),
                    Some(Ok((index, ids, Err(_)))) => {
                        error!(group = index, "Group task panicked");
                        report.groups_failed += 1;
                        self.record_group_failure(&mut report, ids, "group task panicked").await;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Group task failed to complete");
                        report.groups_failed += 1;
                    }
                },
                () = &mut deadline => {
                    report.deadline_exceeded = true;
                    report.groups_abandoned = tasks.len();
                    warn!(
                        abandoned = tasks.len(),
                        deadline = ?self.run_deadline,
                        "Cycle deadline reached, abandoning unfinished groups"
                    );
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics::counter!(telemetry::CYCLES_TOTAL).increment(1);
        metrics::histogram!(telemetry::CYCLE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        info!(
            cycle_id = %report.cycle_id,
            elapsed_ms = report.elapsed_ms,
            processed = report.accounts_processed,
            failed = report.failures.len(),
            dispatched = report.alerts_dispatched,
            suppressed = report.alerts_suppressed,
            undelivered = report.alerts_failed,
            abandoned = report.groups_abandoned,
            "Cycle finished"
        );
        Ok(report)
    }

    async fn record_group_failure(&self, report: &mut CycleReport, ids: Vec<String>, error: &str) {
        for account_id in ids {
            if let Err(e) = self.failed.record(&account_id, error).await {
                warn!(%account_id, error = %e, "Could not record account failure");
            }
            report.failures.push(AccountFailure {
                account_id,
                error: error.to_string(),
            });
        }
    }

    /// Run cycles every `interval` until `shutdown` is cancelled
    ///
    /// A cycle in progress when shutdown is requested is abandoned.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "Scheduler started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                () = shutdown.cancelled() => {
                    warn!("Shutdown requested during cycle, abandoning it");
                    break;
                }
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        error!(error = %e, "Cycle aborted");
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}
