//! Key/value store contract and typed, ttl-aware tables
//!
//! Stores hold opaque blobs. Logical expiry is decided by the caller:
//! every value is wrapped in an [`Envelope`] carrying its write time and
//! ttl, and a record is valid only while `now - written_at < ttl`.
//! Backends may keep expired records around (the accounts cache relies on
//! reading them for its stale fallback).

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;

/// Raw key/value store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the blob stored under `key` in `table`
    async fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a blob; `ttl_secs` is the logical ttl of the record
    async fn put(&self, table: &str, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()>;
}

/// Build the configured backend
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Redis => {
            let store = RedisStore::new(&config.redis_url, config.retention_grace)?;
            store.health_check().await?;
            Ok(Arc::new(store))
        }
    }
}

/// A stored value with its write time and ttl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Payload
    pub value: T,
    /// When the record was written
    pub written_at: DateTime<Utc>,
    /// Logical ttl in seconds
    pub ttl_secs: u64,
}

impl<T> Envelope<T> {
    /// Wrap a value written at `written_at`
    pub fn new(value: T, written_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            written_at,
            ttl_secs: ttl.as_secs(),
        }
    }

    /// Whether the record is still logically present at `now`
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.written_at);
        age < chrono::Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX))
    }
}

/// One table of a [`KvStore`] holding envelopes of `T` with a fixed ttl
pub struct Table {
    store: Arc<dyn KvStore>,
    name: String,
    ttl: Duration,
}

impl Table {
    /// Bind a table name and ttl to a store
    pub fn new(store: Arc<dyn KvStore>, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            name: name.into(),
            ttl,
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical ttl of records written through this table
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read the envelope under `key`, whether or not it is still valid
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Envelope<T>>> {
        match self.store.get(&self.name, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read the value under `key` only if it is valid at `now`
    pub async fn read_valid<T: DeserializeOwned>(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<T>> {
        Ok(self
            .read::<T>(key)
            .await?
            .filter(|envelope| envelope.is_valid(now))
            .map(|envelope| envelope.value))
    }

    /// Write `value` under `key`, stamped with `now` and the table ttl
    pub async fn write<T: Serialize>(&self, key: &str, value: &T, now: DateTime<Utc>) -> Result<()> {
        let envelope = Envelope::new(value, now, self.ttl);
        let bytes = serde_json::to_vec(&envelope)?;
        self.store.put(&self.name, key, bytes, self.ttl.as_secs()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 3, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_envelope_validity_boundary() {
        let envelope = Envelope::new(1u32, t0(), Duration::from_secs(60));
        assert!(envelope.is_valid(t0()));
        assert!(envelope.is_valid(t0() + chrono::Duration::seconds(59)));
        assert!(!envelope.is_valid(t0() + chrono::Duration::seconds(60)));
        assert!(!envelope.is_valid(t0() + chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_table_hides_expired_values() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let table = Table::new(store, "t", Duration::from_secs(60));

        table.write("k", &"hello".to_string(), t0()).await.unwrap();

        let fresh: Option<String> = table.read_valid("k", t0()).await.unwrap();
        assert_eq!(fresh.as_deref(), Some("hello"));

        let later = t0() + chrono::Duration::minutes(5);
        let expired: Option<String> = table.read_valid("k", later).await.unwrap();
        assert!(expired.is_none());

        // still physically present
        let raw = table.read::<String>("k").await.unwrap().unwrap();
        assert_eq!(raw.value, "hello");
        assert_eq!(raw.written_at, t0());
    }
}
