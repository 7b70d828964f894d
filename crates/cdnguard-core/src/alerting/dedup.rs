//! Sent-alert records for suppression and escalation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{Severity, ViolationKey};
use crate::store::Table;

/// Last alert delivered for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentAlert {
    /// Severity that was delivered
    pub severity: Severity,
    /// Delivery time
    pub sent_at: DateTime<Utc>,
}

/// Suppresses repeats of the same or lower severity within the ttl
pub struct AlertDedupStore {
    table: Table,
    clock: Arc<dyn Clock>,
}

impl AlertDedupStore {
    /// Dedup store over `table`
    pub fn new(table: Table, clock: Arc<dyn Clock>) -> Self {
        Self { table, clock }
    }

    /// Whether an alert of `severity` for `key` should go out
    ///
    /// True when nothing live was sent for the key, or when `severity` is
    /// strictly higher than what was sent. A store failure lets the alert
    /// through.
    pub async fn should_send(&self, key: &ViolationKey, severity: Severity) -> bool {
        match self.last_sent(key).await {
            Ok(None) => true,
            Ok(Some(sent)) => {
                let escalation = severity > sent.severity;
                debug!(
                    key = %key,
                    %severity,
                    last = %sent.severity,
                    escalation,
                    "Found live sent-alert record"
                );
                escalation
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Sent-alert lookup failed, not suppressing");
                true
            }
        }
    }

    /// Live record for `key`, if any
    pub async fn last_sent(&self, key: &ViolationKey) -> Result<Option<SentAlert>> {
        self.table.read_valid(&key.to_string(), self.clock.now()).await
    }

    /// Remember that `severity` was delivered for `key`
    pub async fn record_sent(&self, key: &ViolationKey, severity: Severity) -> Result<()> {
        let now = self.clock.now();
        self.table
            .write(
                &key.to_string(),
                &SentAlert {
                    severity,
                    sent_at: now,
                },
                now,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::MetricName;
    use crate::store::{KvStore, MemoryStore};
    use chrono::TimeZone;
    use std::time::Duration;

    fn dedup() -> (AlertDedupStore, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 3, 6, 0, 0).unwrap(),
        ));
        let dyn_store: Arc<dyn KvStore> = store.clone();
        let dedup = AlertDedupStore::new(
            Table::new(dyn_store, "sent", Duration::from_secs(24 * 3600)),
            clock.clone(),
        );
        (dedup, clock, store)
    }

    fn key() -> ViolationKey {
        ViolationKey::new("111", "E1", MetricName::Bytes)
    }

    #[tokio::test]
    async fn test_same_or_lower_severity_is_suppressed() {
        let (dedup, _, _) = dedup();
        assert!(dedup.should_send(&key(), Severity::Warning).await);

        dedup.record_sent(&key(), Severity::Critical).await.unwrap();
        assert!(!dedup.should_send(&key(), Severity::Critical).await);
        assert!(!dedup.should_send(&key(), Severity::Warning).await);
    }

    #[tokio::test]
    async fn test_escalation_is_never_suppressed() {
        let (dedup, _, _) = dedup();
        dedup.record_sent(&key(), Severity::Warning).await.unwrap();
        assert!(dedup.should_send(&key(), Severity::Critical).await);
    }

    #[tokio::test]
    async fn test_suppression_ends_with_ttl() {
        let (dedup, clock, _) = dedup();
        dedup.record_sent(&key(), Severity::Warning).await.unwrap();

        clock.advance(chrono::Duration::hours(23));
        assert!(!dedup.should_send(&key(), Severity::Warning).await);

        clock.advance(chrono::Duration::hours(1));
        assert!(dedup.should_send(&key(), Severity::Warning).await);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let (dedup, _, store) = dedup();
        dedup.record_sent(&key(), Severity::Warning).await.unwrap();
        store.set_unavailable(true);
        assert!(dedup.should_send(&key(), Severity::Warning).await);
    }
}
