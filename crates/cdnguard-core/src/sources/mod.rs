//! External data sources
//!
//! The organization listing and the metrics API are reached through these
//! traits; [`HttpGateway`] implements both over a JSON gateway.

mod gateway;

pub use gateway::HttpGateway;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Account, Distribution, MetricName, MetricSample, TimeRange};

/// Lists the organization's accounts
#[async_trait]
pub trait OrganizationSource: Send + Sync {
    /// Every account with its membership status
    async fn list_accounts(&self) -> Result<Vec<Account>>;
}

/// Queries CDN traffic metrics inside member accounts
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Distributions owned by an account
    async fn list_distributions(&self, account_id: &str) -> Result<Vec<Distribution>>;

    /// Sums over `range` for every distribution and metric, in one call
    async fn query_batched(
        &self,
        account_id: &str,
        distribution_ids: &[String],
        metrics: &[MetricName],
        range: TimeRange,
    ) -> Result<Vec<MetricSample>>;

    /// Per-period sums over `range`, one value per `period`
    async fn query_history(
        &self,
        account_id: &str,
        distribution_id: &str,
        metric: MetricName,
        range: TimeRange,
        period: Duration,
    ) -> Result<Vec<f64>>;
}
