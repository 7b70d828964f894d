//! Redis store backend

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use redis::AsyncCommands;
use tracing::debug;

use super::KvStore;
use crate::error::{Error, Result};

/// Store backed by a Redis connection pool
///
/// Keys are `<table>:<key>`. Records are given a physical expiry of the
/// logical ttl plus `retention_grace`, so recently expired values stay
/// readable for stale fallbacks.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    retention_grace: Duration,
}

impl RedisStore {
    /// Create a pool for `url`; no connection is made until first use
    pub fn new(url: &str, retention_grace: Duration) -> Result<Self> {
        let cfg = RedisConfig::from_url(url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Redis(e.to_string()))?;

        Ok(Self {
            pool,
            retention_grace,
        })
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| Error::Redis(e.to_string()))
    }

    fn physical_ttl(&self, ttl_secs: u64) -> u64 {
        ttl_secs.saturating_add(self.retention_grace.as_secs()).max(1)
    }
}

fn redis_key(table: &str, key: &str) -> String {
    format!("{table}:{key}")
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(redis_key(table, key)).await?;
        Ok(value)
    }

    async fn put(&self, table: &str, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let expiry = self.physical_ttl(ttl_secs);
        debug!(table, key, expiry, "Writing record");
        let _: () = conn.set_ex(redis_key(table, key), value, expiry).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(redis_key("cf_abuse_counter", "a#d#bytes"), "cf_abuse_counter:a#d#bytes");
    }

    #[test]
    fn test_physical_ttl_adds_grace() {
        let store = RedisStore::new("redis://localhost:6379", Duration::from_secs(100)).unwrap();
        assert_eq!(store.physical_ttl(60), 160);
        assert_eq!(store.physical_ttl(u64::MAX), u64::MAX);
    }
}
