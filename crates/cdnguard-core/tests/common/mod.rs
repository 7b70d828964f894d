//! In-memory collaborators for pipeline tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use cdnguard::alerting::MessageChannel;
use cdnguard::clock::ManualClock;
use cdnguard::config::Config;
use cdnguard::counter::ViolationCounterStore;
use cdnguard::detection::{Collaborators, CycleReport, Scheduler};
use cdnguard::models::{
    Account, Distribution, MetricName, MetricSample, TimeRange, ViolationKey,
};
use cdnguard::sources::{MetricsSource, OrganizationSource};
use cdnguard::store::{KvStore, MemoryStore, Table};
use cdnguard::{Error, Result};

/// Organization listing backed by a vector
#[derive(Default)]
pub struct FakeOrganization {
    pub accounts: Mutex<Vec<Account>>,
    pub failing: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl OrganizationSource for FakeOrganization {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::from_status("list_accounts", 400, "AccessDenied"));
        }
        Ok(self.accounts.lock().clone())
    }
}

type SeriesKey = (String, String, MetricName);

/// Metrics API with scripted values
#[derive(Default)]
pub struct FakeMetrics {
    pub distributions: Mutex<HashMap<String, Vec<String>>>,
    pub current: Mutex<HashMap<SeriesKey, f64>>,
    pub baseline: Mutex<HashMap<SeriesKey, f64>>,
    pub failing_accounts: Mutex<HashSet<String>>,
    pub failing_history: Mutex<HashSet<SeriesKey>>,
    pub slow_accounts: Mutex<HashSet<String>>,
    pub panicking_accounts: Mutex<HashSet<String>>,
    pub batched_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
}

impl FakeMetrics {
    pub fn add_distribution(&self, account: &str, dist: &str) {
        self.distributions
            .lock()
            .entry(account.to_string())
            .or_default()
            .push(dist.to_string());
    }

    pub fn set_current(&self, account: &str, dist: &str, metric: MetricName, value: f64) {
        self.current
            .lock()
            .insert(series(account, dist, metric), value);
    }

    pub fn set_baseline(&self, account: &str, dist: &str, metric: MetricName, value: f64) {
        self.baseline
            .lock()
            .insert(series(account, dist, metric), value);
    }
}

pub fn series(account: &str, dist: &str, metric: MetricName) -> SeriesKey {
    (account.to_string(), dist.to_string(), metric)
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn list_distributions(&self, account_id: &str) -> Result<Vec<Distribution>> {
        let slow = self.slow_accounts.lock().contains(account_id);
        if slow {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.panicking_accounts.lock().contains(account_id) {
            panic!("malformed distribution listing for {account_id}");
        }
        if self.failing_accounts.lock().contains(account_id) {
            return Err(Error::from_status("list_distributions", 403, "AccessDenied"));
        }
        Ok(self
            .distributions
            .lock()
            .get(account_id)
            .map(|ids| ids.iter().map(|id| Distribution::new(id, account_id)).collect())
            .unwrap_or_default())
    }

    async fn query_batched(
        &self,
        account_id: &str,
        distribution_ids: &[String],
        metrics: &[MetricName],
        range: TimeRange,
    ) -> Result<Vec<MetricSample>> {
        self.batched_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.current.lock();
        let mut samples = Vec::new();
        for dist in distribution_ids {
            for &metric in metrics {
                if let Some(value) = current.get(&series(account_id, dist, metric)) {
                    samples.push(MetricSample {
                        distribution_id: dist.clone(),
                        metric,
                        value: *value,
                        period_start: range.start,
                        period_end: range.end,
                    });
                }
            }
        }
        Ok(samples)
    }

    async fn query_history(
        &self,
        account_id: &str,
        distribution_id: &str,
        metric: MetricName,
        range: TimeRange,
        period: Duration,
    ) -> Result<Vec<f64>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let key = series(account_id, distribution_id, metric);
        if self.failing_history.lock().contains(&key) {
            return Err(Error::from_status("query_history", 400, "InvalidParameter"));
        }
        let value = self.baseline.lock().get(&key).copied().unwrap_or(0.0);
        let periods = (range.length().num_seconds() / period.as_secs() as i64).max(1) as usize;
        Ok(vec![value; periods])
    }
}

/// Channel that records every message
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, String)>>,
    pub failing: AtomicBool,
}

impl RecordingChannel {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, target: &str, message: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::from_status("send", 400, "Bad Request: chat not found"));
        }
        self.sent
            .lock()
            .push((target.to_string(), message.to_string()));
        Ok(())
    }
}

/// A full pipeline over in-memory collaborators
pub struct Harness {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub organization: Arc<FakeOrganization>,
    pub metrics: Arc<FakeMetrics>,
    pub channel: Arc<RecordingChannel>,
}

impl Harness {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.channel.telegram_bot_token = "123:abc".to_string();
        config.channel.telegram_chat_id = "-100200300".to_string();
        config.schedule.retry_attempts = 2;
        config.schedule.retry_base_delay = Duration::from_millis(10);
        config.schedule.retry_max_delay = Duration::from_millis(50);

        Self {
            config,
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 2, 3, 6, 0, 0).unwrap(),
            )),
            organization: Arc::new(FakeOrganization::default()),
            metrics: Arc::new(FakeMetrics::default()),
            channel: Arc::new(RecordingChannel::default()),
        }
    }

    pub fn add_account(&self, id: &str) {
        self.organization
            .accounts
            .lock()
            .push(Account::new(id, format!("{id}-name"), format!("{id}@example.com")));
    }

    pub fn scheduler(&self) -> Scheduler {
        let store: Arc<dyn KvStore> = self.store.clone();
        Scheduler::from_config(
            &self.config.clone().validated().unwrap(),
            Collaborators {
                store,
                organization: self.organization.clone(),
                metrics: self.metrics.clone(),
                channel: self.channel.clone(),
                clock: self.clock.clone(),
            },
        )
        .unwrap()
    }

    /// Stored consecutive-violation count for `key`
    pub async fn violation_count(&self, key: &ViolationKey) -> u32 {
        let store: Arc<dyn KvStore> = self.store.clone();
        let stores = &self.config.stores;
        ViolationCounterStore::new(
            Table::new(store, stores.tables.counters.clone(), stores.ttls.counters),
            self.clock.clone(),
        )
        .get(key)
        .await
        .unwrap()
    }

    /// Run a cycle, then move the clock to the next period
    pub async fn cycle(&self, scheduler: &Scheduler) -> CycleReport {
        let report = scheduler.run_cycle().await.unwrap();
        self.clock.advance(chrono::Duration::minutes(15));
        report
    }
}
