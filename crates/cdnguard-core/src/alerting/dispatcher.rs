//! Bounded-concurrency alert delivery
//!
//! One [`Dispatcher`] is shared by every worker in a cycle, so its
//! semaphore bounds deliveries across all groups. Delivery failures are
//! returned as outcomes and never abort the cycle.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::channel::MessageChannel;
use super::dedup::AlertDedupStore;
use super::template::{render, MessageTemplate};
use crate::models::{Alert, Severity, ViolationKey};
use crate::retry::{retry, RetryPolicy};
use crate::telemetry;

/// Result of delivering one alert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Channel accepted the message
    Delivered {
        key: ViolationKey,
        severity: Severity,
    },
    /// Retries exhausted or permanent failure
    Failed {
        key: ViolationKey,
        severity: Severity,
        error: String,
    },
}

impl DispatchOutcome {
    /// Whether the alert went out
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

/// Renders and delivers alerts
pub struct Dispatcher {
    channel: Arc<dyn MessageChannel>,
    dedup: Arc<AlertDedupStore>,
    template: MessageTemplate,
    target: String,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl Dispatcher {
    /// Create a dispatcher delivering to `target` with at most `max_workers`
    /// concurrent sends
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        dedup: Arc<AlertDedupStore>,
        template: MessageTemplate,
        target: impl Into<String>,
        retry: RetryPolicy,
        max_workers: usize,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            channel,
            dedup,
            template,
            target: target.into(),
            retry,
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Deliver every alert, in no particular order
    pub async fn dispatch_all(&self, alerts: Vec<Alert>) -> Vec<DispatchOutcome> {
        if alerts.is_empty() {
            return Vec::new();
        }

        stream::iter(alerts)
            .map(|alert| self.dispatch(alert))
            .buffer_unordered(self.max_workers)
            .collect()
            .await
    }

    /// Deliver one alert and record it as sent on success
    pub async fn dispatch(&self, alert: Alert) -> DispatchOutcome {
        let key = alert.key.clone();
        let severity = alert.severity;

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return DispatchOutcome::Failed {
                    key,
                    severity,
                    error: e.to_string(),
                }
            }
        };

        let message = render(&self.template, &alert);
        let sent = retry(&self.retry, "send_alert", || {
            self.channel.send(&self.target, &message)
        })
        .await;

        match sent {
            Ok(()) => {
                metrics::counter!(telemetry::ALERTS_DISPATCHED_TOTAL, "severity" => severity.to_string())
                    .increment(1);
                if let Err(e) = self.dedup.record_sent(&key, severity).await {
                    warn!(key = %key, error = %e, "Alert delivered but sent-record write failed");
                }
                info!(
                    key = %key,
                    %severity,
                    channel = self.channel.name(),
                    count = alert.consecutive_count,
                    "Alert delivered"
                );
                DispatchOutcome::Delivered { key, severity }
            }
            Err(e) => {
                metrics::counter!(telemetry::ALERTS_FAILED_TOTAL).increment(1);
                error!(
                    key = %key,
                    %severity,
                    channel = self.channel.name(),
                    error = %e,
                    "Alert delivery failed"
                );
                DispatchOutcome::Failed {
                    key,
                    severity,
                    error: e.to_string(),
                }
            }
        }
    }
}
