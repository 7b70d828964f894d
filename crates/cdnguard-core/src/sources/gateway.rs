//! JSON HTTP gateway for organization and metrics queries

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MetricsSource, OrganizationSource};
use crate::config::{AwsConfig, GatewayConfig};
use crate::error::{Error, Result};
use crate::models::{Account, Distribution, MetricName, MetricSample, TimeRange};

const REGION_HEADER: &str = "x-cdnguard-region";
const ROLE_HEADER: &str = "x-cdnguard-role";

/// Gateway client
///
/// Every request carries the configured region and cross-account role
/// name; credential handling happens behind the gateway.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    region: String,
    role_name: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct DistributionEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DistributionsResponse {
    distributions: Vec<DistributionEntry>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    distribution_ids: &'a [String],
    metrics: &'a [MetricName],
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    samples: Vec<MetricSample>,
}

#[derive(Debug, Serialize)]
struct HistoryRequest<'a> {
    distribution_id: &'a str,
    metric: MetricName,
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
    period_secs: u64,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    values: Vec<f64>,
}

impl HttpGateway {
    /// Create a gateway client
    pub fn new(gateway: &GatewayConfig, aws: &AwsConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: gateway.base_url.trim_end_matches('/').to_string(),
            region: aws.region.clone(),
            role_name: aws.role_name.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_context(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(REGION_HEADER, &self.region)
            .header(ROLE_HEADER, &self.role_name)
    }

    async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(operation, status.as_u16(), body));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl OrganizationSource for HttpGateway {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let response = self
            .with_context(self.client.get(self.url("/v1/accounts")))
            .send()
            .await?;
        let body: AccountsResponse = Self::decode("list_accounts", response).await?;
        debug!(count = body.accounts.len(), "Listed organization accounts");
        Ok(body.accounts)
    }
}

#[async_trait]
impl MetricsSource for HttpGateway {
    async fn list_distributions(&self, account_id: &str) -> Result<Vec<Distribution>> {
        let url = self.url(&format!("/v1/accounts/{account_id}/distributions"));
        let response = self.with_context(self.client.get(url)).send().await?;
        let body: DistributionsResponse = Self::decode("list_distributions", response).await?;

        Ok(body
            .distributions
            .into_iter()
            .map(|d| Distribution::new(d.id, account_id))
            .collect())
    }

    async fn query_batched(
        &self,
        account_id: &str,
        distribution_ids: &[String],
        metrics: &[MetricName],
        range: TimeRange,
    ) -> Result<Vec<MetricSample>> {
        let url = self.url(&format!("/v1/accounts/{account_id}/metrics/query"));
        let request = QueryRequest {
            distribution_ids,
            metrics,
            start: range.start,
            end: range.end,
        };
        let response = self
            .with_context(self.client.post(url).json(&request))
            .send()
            .await?;
        let body: QueryResponse = Self::decode("query_batched", response).await?;
        Ok(body.samples)
    }

    async fn query_history(
        &self,
        account_id: &str,
        distribution_id: &str,
        metric: MetricName,
        range: TimeRange,
        period: Duration,
    ) -> Result<Vec<f64>> {
        let url = self.url(&format!("/v1/accounts/{account_id}/metrics/history"));
        let request = HistoryRequest {
            distribution_id,
            metric,
            start: range.start,
            end: range.end,
            period_secs: period.as_secs(),
        };
        let response = self
            .with_context(self.client.post(url).json(&request))
            .send()
            .await?;
        let body: HistoryResponse = Self::decode("query_history", response).await?;
        Ok(body.values)
    }
}
