//! In-process store backend

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::KvStore;
use crate::error::{Error, Result};

/// Store backed by a concurrent map
///
/// Records are never physically evicted; expiry is purely logical.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<(String, String), Vec<u8>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back, to simulate an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of records in a table
    pub fn count(&self, table: &str) -> usize {
        self.entries.iter().filter(|e| e.key().0 == table).count()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::store("memory store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        Ok(self
            .entries
            .get(&(table.to_string(), key.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn put(&self, table: &str, key: &str, value: Vec<u8>, _ttl_secs: u64) -> Result<()> {
        self.check()?;
        self.entries
            .insert((table.to_string(), key.to_string()), value);
        Ok(())
    }
}
