//! Read-through ttl caches
//!
//! [`TtlCache::get_or_refresh`] returns a valid cached value or runs the
//! refresh function and stores its result. What happens when the refresh
//! fails depends on the [`StalePolicy`]: the accounts cache keeps the
//! pipeline running on its last known value, while the baseline cache
//! never serves data past its ttl.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{Account, Baseline, ViolationKey};
use crate::store::Table;
use crate::telemetry;

const ACCOUNTS_KEY: &str = "ou_accounts";

/// Behaviour when a refresh fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Return the last stored value, however old, if there is one
    ServeStale,
    /// Propagate the refresh error
    Strict,
}

/// Generic read-through cache over one store table
pub struct TtlCache {
    name: &'static str,
    table: Table,
    clock: Arc<dyn Clock>,
    policy: StalePolicy,
}

impl TtlCache {
    /// Create a cache; `name` labels logs and metrics
    pub fn new(name: &'static str, table: Table, clock: Arc<dyn Clock>, policy: StalePolicy) -> Self {
        Self {
            name,
            table,
            clock,
            policy,
        }
    }

    /// Valid cached value for `key`, or the result of `refresh`
    ///
    /// A store read failure counts as a miss and a store write failure is
    /// logged; neither fails the call.
    pub async fn get_or_refresh<T, F, Fut>(&self, key: &str, refresh: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let now = self.clock.now();

        let stored = match self.table.read::<T>(key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(cache = self.name, key, error = %e, "Cache read failed, treating as miss");
                None
            }
        };

        let stale = match stored {
            Some(envelope) if envelope.is_valid(now) => {
                debug!(cache = self.name, key, "Cache hit");
                return Ok(envelope.value);
            }
            other => other,
        };

        match refresh().await {
            Ok(value) => {
                metrics::counter!(telemetry::CACHE_REFRESH_TOTAL, "cache" => self.name, "outcome" => "ok")
                    .increment(1);
                if let Err(e) = self.table.write(key, &value, self.clock.now()).await {
                    warn!(cache = self.name, key, error = %e, "Cache write failed");
                }
                Ok(value)
            }
            Err(e) => {
                metrics::counter!(telemetry::CACHE_REFRESH_TOTAL, "cache" => self.name, "outcome" => "error")
                    .increment(1);
                match (self.policy, stale) {
                    (StalePolicy::ServeStale, Some(envelope)) => {
                        warn!(
                            cache = self.name,
                            key,
                            error = %e,
                            cached_at = %envelope.written_at,
                            "Refresh failed, serving stale value"
                        );
                        Ok(envelope.value)
                    }
                    _ => Err(e),
                }
            }
        }
    }
}

/// Cache of the organization's account list
pub struct AccountsCache {
    cache: TtlCache,
}

impl AccountsCache {
    /// Accounts cache over `table`, serving stale values on refresh failure
    pub fn new(table: Table, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::new("accounts", table, clock, StalePolicy::ServeStale),
        }
    }

    /// Cached account list, refreshed through `refresh` when expired
    ///
    /// Fails only when the refresh fails and nothing was ever cached.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<Vec<Account>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Account>>>,
    {
        self.cache.get_or_refresh(ACCOUNTS_KEY, refresh).await
    }
}

/// Cache of per-distribution baselines
pub struct BaselineCache {
    cache: TtlCache,
}

impl BaselineCache {
    /// Baseline cache over `table`, never serving expired values
    pub fn new(table: Table, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::new("baseline", table, clock, StalePolicy::Strict),
        }
    }

    /// Cached baseline for `key`, refreshed through `refresh` when expired
    pub async fn get_or_refresh<F, Fut>(&self, key: &ViolationKey, refresh: F) -> Result<Baseline>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Baseline>>,
    {
        self.cache
            .get_or_refresh(&format!("baseline#{key}"), refresh)
            .await
    }
}
