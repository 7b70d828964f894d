//! Logging setup and pipeline metrics
//!
//! Metrics go through the `metrics` facade; without an installed recorder
//! they are no-ops, so library code records unconditionally.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, TelemetryConfig};
use crate::error::{Error, Result};

/// Completed scheduling cycles
pub const CYCLES_TOTAL: &str = "cdnguard_cycles_total";
/// Accounts that failed processing
pub const ACCOUNTS_FAILED_TOTAL: &str = "cdnguard_accounts_failed_total";
/// Alerts accepted by the channel, labelled by severity
pub const ALERTS_DISPATCHED_TOTAL: &str = "cdnguard_alerts_dispatched_total";
/// Alert candidates suppressed by dedup
pub const ALERTS_SUPPRESSED_TOTAL: &str = "cdnguard_alerts_suppressed_total";
/// Alerts that exhausted delivery retries
pub const ALERTS_FAILED_TOTAL: &str = "cdnguard_alerts_failed_total";
/// Cache refreshes, labelled by cache and outcome
pub const CACHE_REFRESH_TOTAL: &str = "cdnguard_cache_refresh_total";
/// Wall time of a cycle
pub const CYCLE_DURATION_SECONDS: &str = "cdnguard_cycle_duration_seconds";

/// Initialise the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. `verbose` forces
/// `debug` when `RUST_LOG` is unset.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };

    result.map_err(|e| Error::internal(format!("failed to initialise logging: {e}")))
}

/// Install the Prometheus exporter when a listen address is configured
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(config: &TelemetryConfig) -> Result<Option<SocketAddr>> {
    let Some(addr) = config.prometheus_listen else {
        return Ok(None);
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::internal(format!("failed to install Prometheus exporter: {e}")))?;

    describe();
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(Some(addr))
}

fn describe() {
    metrics::describe_counter!(CYCLES_TOTAL, "Completed scheduling cycles");
    metrics::describe_counter!(ACCOUNTS_FAILED_TOTAL, "Accounts that failed processing");
    metrics::describe_counter!(ALERTS_DISPATCHED_TOTAL, "Alerts accepted by the channel");
    metrics::describe_counter!(ALERTS_SUPPRESSED_TOTAL, "Alert candidates suppressed by dedup");
    metrics::describe_counter!(ALERTS_FAILED_TOTAL, "Alerts that exhausted delivery retries");
    metrics::describe_counter!(CACHE_REFRESH_TOTAL, "Cache refreshes by cache and outcome");
    metrics::describe_histogram!(
        CYCLE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall time of a scheduling cycle"
    );
}
