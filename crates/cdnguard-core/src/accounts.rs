//! Active-account discovery and failed-account tracking

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::AccountsCache;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::Account;
use crate::retry::{retry, RetryPolicy};
use crate::sources::OrganizationSource;
use crate::store::Table;
use crate::telemetry;

const MAX_ERROR_LEN: usize = 200;
const FAILED_LOOKUP_CONCURRENCY: usize = 16;

/// Why an account was marked failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAccount {
    /// Truncated error text
    pub error: String,
    /// When the failure was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Ttl-bounded record of accounts whose processing failed
///
/// A live record keeps the account out of scheduling; once it expires the
/// account is evaluated fresh.
pub struct FailedAccountStore {
    table: Table,
    clock: Arc<dyn Clock>,
}

impl FailedAccountStore {
    /// Failed-account store over `table`
    pub fn new(table: Table, clock: Arc<dyn Clock>) -> Self {
        Self { table, clock }
    }

    /// Record a failure for `account_id`
    pub async fn record(&self, account_id: &str, error: &str) -> Result<()> {
        let now = self.clock.now();
        let entry = FailedAccount {
            error: error.chars().take(MAX_ERROR_LEN).collect(),
            recorded_at: now,
        };
        self.table.write(account_id, &entry, now).await?;
        metrics::counter!(telemetry::ACCOUNTS_FAILED_TOTAL).increment(1);
        warn!(account_id, error = %entry.error, "Account marked as failed");
        Ok(())
    }

    /// The live failure record for `account_id`, if any
    pub async fn get(&self, account_id: &str) -> Result<Option<FailedAccount>> {
        self.table.read_valid(account_id, self.clock.now()).await
    }

    /// Whether `account_id` has a live failure record
    pub async fn is_failed(&self, account_id: &str) -> Result<bool> {
        Ok(self.get(account_id).await?.is_some())
    }
}

/// Produces the accounts to evaluate each cycle
pub struct AccountDirectory {
    source: Arc<dyn OrganizationSource>,
    cache: AccountsCache,
    failed: Arc<FailedAccountStore>,
    retry: RetryPolicy,
}

impl AccountDirectory {
    /// Create a directory
    pub fn new(
        source: Arc<dyn OrganizationSource>,
        cache: AccountsCache,
        failed: Arc<FailedAccountStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            cache,
            failed,
            retry,
        }
    }

    /// Active accounts without a live failure record, in listing order
    ///
    /// Fails only when the listing fails and nothing was ever cached.
    pub async fn list_active_accounts(&self) -> Result<Vec<Account>> {
        let accounts = self
            .cache
            .get_or_refresh(|| async {
                retry(&self.retry, "list_accounts", || self.source.list_accounts()).await
            })
            .await?;

        let total = accounts.len();
        let active: Vec<Account> = stream::iter(accounts.into_iter().filter(Account::is_active))
            .map(|account| async move {
                match self.failed.is_failed(&account.id).await {
                    Ok(true) => None,
                    Ok(false) => Some(account),
                    Err(e) => {
                        warn!(account_id = %account.id, error = %e, "Failed-account lookup failed, including account");
                        Some(account)
                    }
                }
            })
            .buffered(FAILED_LOOKUP_CONCURRENCY)
            .filter_map(|account| async move { account })
            .collect()
            .await;

        info!(total, active = active.len(), "Resolved accounts to evaluate");
        Ok(active)
    }
}
