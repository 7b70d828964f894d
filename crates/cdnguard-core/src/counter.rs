//! Consecutive-violation counters
//!
//! One counter per (account, distribution, metric), moved at most once per
//! evaluation period: the record remembers the period that last updated
//! it, and a second update inside that period returns the stored count
//! unchanged. Updates are read-modify-write without locking, so two
//! overlapping evaluations of the same key may lose an update. The count
//! itself never goes below zero.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::models::ViolationKey;
use crate::store::Table;

/// Stored counter payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Consecutive violating periods
    pub count: u32,
    /// Start of the period that last moved the count
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
}

/// Persistent, ttl-bounded violation counters
pub struct ViolationCounterStore {
    table: Table,
    clock: Arc<dyn Clock>,
}

impl ViolationCounterStore {
    /// Counter store over `table`
    pub fn new(table: Table, clock: Arc<dyn Clock>) -> Self {
        Self { table, clock }
    }

    /// Current count; absent or expired records read as zero
    pub async fn get(&self, key: &ViolationKey) -> Result<u32> {
        Ok(self.read(key).await?.map_or(0, |r| r.count))
    }

    /// Add one for the period starting at `period_start` and refresh the
    /// ttl, returning the new count
    pub async fn increment(&self, key: &ViolationKey, period_start: DateTime<Utc>) -> Result<u32> {
        let record = self.read(key).await?;
        if let Some(count) = already_counted(record, period_start) {
            debug!(key = %key, count, "Counter already moved this period");
            return Ok(count);
        }

        let count = record.map_or(0, |r| r.count).saturating_add(1);
        self.put(key, count, period_start).await?;
        debug!(key = %key, count, "Violation counter incremented");
        Ok(count)
    }

    /// Subtract one for the period starting at `period_start`, clamped at
    /// zero, returning the new count
    ///
    /// A counter already at zero is left untouched.
    pub async fn decrement(&self, key: &ViolationKey, period_start: DateTime<Utc>) -> Result<u32> {
        let record = self.read(key).await?;
        if let Some(count) = already_counted(record, period_start) {
            debug!(key = %key, count, "Counter already moved this period");
            return Ok(count);
        }

        let current = record.map_or(0, |r| r.count);
        if current == 0 {
            return Ok(0);
        }

        let count = current - 1;
        self.put(key, count, period_start).await?;
        debug!(key = %key, count, "Violation counter decremented");
        Ok(count)
    }

    async fn read(&self, key: &ViolationKey) -> Result<Option<CounterRecord>> {
        self.table
            .read_valid(&key.to_string(), self.clock.now())
            .await
    }

    async fn put(&self, key: &ViolationKey, count: u32, period_start: DateTime<Utc>) -> Result<()> {
        let record = CounterRecord {
            count,
            period_start: Some(period_start),
        };
        self.table
            .write(&key.to_string(), &record, self.clock.now())
            .await
    }
}

fn already_counted(record: Option<CounterRecord>, period_start: DateTime<Utc>) -> Option<u32> {
    record
        .filter(|r| r.period_start == Some(period_start))
        .map(|r| r.count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::MetricName;
    use crate::store::{KvStore, MemoryStore};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::time::Duration;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 3, 6, 0, 0).unwrap()
    }

    /// Start of the `n`th 15-minute period after `start()`
    fn period(n: i64) -> DateTime<Utc> {
        start() + chrono::Duration::minutes(15 * n)
    }

    fn counters() -> (ViolationCounterStore, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let dyn_store: Arc<dyn KvStore> = store.clone();
        let counters = ViolationCounterStore::new(
            Table::new(dyn_store, "counters", Duration::from_secs(3600)),
            clock.clone(),
        );
        (counters, clock, store)
    }

    fn key() -> ViolationKey {
        ViolationKey::new("111122223333", "E2ABC", MetricName::Requests)
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let (counters, _, _) = counters();
        assert_eq!(counters.get(&key()).await.unwrap(), 0);
        assert_eq!(counters.increment(&key(), period(0)).await.unwrap(), 1);
        assert_eq!(counters.increment(&key(), period(1)).await.unwrap(), 2);
        assert_eq!(counters.decrement(&key(), period(2)).await.unwrap(), 1);
        assert_eq!(counters.get(&key()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_update_in_same_period_keeps_count() {
        let (counters, _, _) = counters();
        assert_eq!(counters.increment(&key(), period(0)).await.unwrap(), 1);
        assert_eq!(counters.increment(&key(), period(0)).await.unwrap(), 1);
        assert_eq!(counters.decrement(&key(), period(0)).await.unwrap(), 1);

        assert_eq!(counters.increment(&key(), period(1)).await.unwrap(), 2);
        assert_eq!(counters.decrement(&key(), period(2)).await.unwrap(), 1);
        assert_eq!(counters.decrement(&key(), period(2)).await.unwrap(), 1);
        assert_eq!(counters.get(&key()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_decrement_at_zero_is_noop() {
        let (counters, _, store) = counters();
        for n in 0..5 {
            assert_eq!(counters.decrement(&key(), period(n)).await.unwrap(), 0);
        }
        assert_eq!(store.count("counters"), 0);
    }

    #[tokio::test]
    async fn test_expired_counter_resets() {
        let (counters, clock, _) = counters();
        counters.increment(&key(), period(0)).await.unwrap();
        counters.increment(&key(), period(1)).await.unwrap();

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(counters.get(&key()).await.unwrap(), 0);
        assert_eq!(counters.increment(&key(), period(8)).await.unwrap(), 1);
    }

    proptest! {
        #[test]
        fn prop_counter_never_negative_and_matches_model(ops in prop::collection::vec(any::<bool>(), 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (counters, _, _) = counters();
                let mut model: u32 = 0;
                for (n, up) in (0i64..).zip(ops) {
                    let got = if up {
                        model += 1;
                        counters.increment(&key(), period(n)).await.unwrap()
                    } else {
                        model = model.saturating_sub(1);
                        counters.decrement(&key(), period(n)).await.unwrap()
                    };
                    prop_assert_eq!(got, model);
                }
                Ok(())
            })?;
        }
    }
}
