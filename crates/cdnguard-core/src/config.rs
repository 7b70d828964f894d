//! Configuration management for cdnguard
//!
//! Configuration is layered: built-in defaults, an optional file, then
//! environment variables prefixed with `CDNGUARD_` using `__` between
//! section and key (`CDNGUARD_CONCURRENCY__MAX_WORKERS=20`). A loaded
//! [`Config`] has always passed [`Config::validate`].

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::MetricName;

const MIB: f64 = 1024.0 * 1024.0;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CDNGUARD";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cloud account access
    pub aws: AwsConfig,

    /// Detection thresholds
    pub detection: DetectionConfig,

    /// Worker pool sizes
    pub concurrency: ConcurrencyConfig,

    /// Persistent stores
    pub stores: StoreConfig,

    /// Cycle timing, timeouts and retries
    pub schedule: ScheduleConfig,

    /// Alert delivery channel
    pub channel: ChannelConfig,

    /// Metrics / organization gateway
    pub gateway: GatewayConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics export
    pub telemetry: TelemetryConfig,
}

/// Cloud account access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region used for organization and store calls
    pub region: String,
    /// Role assumed in member accounts
    pub role_name: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            role_name: "OrganizationAccessRole_DO_NOT_DELETE".to_string(),
        }
    }
}

/// Per-metric absolute thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholds {
    /// Current value must reach this for a critical classification
    pub critical_absolute: f64,
    /// Current value must reach this for a warning classification
    pub warning_absolute: f64,
    /// Baselines below this are replaced by it
    pub minimum_baseline: f64,
}

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Relative multiplier for critical
    pub critical_multiplier: f64,
    /// Relative multiplier for warning
    pub warning_multiplier: f64,
    /// Consecutive violating cycles before a critical alert fires
    pub critical_duration: u32,
    /// Consecutive violating cycles before a warning alert fires
    pub warning_duration: u32,
    /// Request-count thresholds
    pub requests: MetricThresholds,
    /// Byte thresholds
    pub bytes: MetricThresholds,
    /// Distributions below both floors are treated as quiet
    pub min_requests: f64,
    /// Byte floor paired with `min_requests`
    pub min_bytes: f64,
    /// Length of one evaluation period
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Trailing window the baseline is averaged over
    #[serde(with = "humantime_serde")]
    pub baseline_window: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            critical_multiplier: 3.0,
            warning_multiplier: 2.0,
            critical_duration: 1,
            warning_duration: 2,
            requests: MetricThresholds {
                critical_absolute: 2500.0,
                warning_absolute: 1250.0,
                minimum_baseline: 25.0,
            },
            bytes: MetricThresholds {
                critical_absolute: 1280.0 * MIB,
                warning_absolute: 512.0 * MIB,
                minimum_baseline: 25.0 * MIB,
            },
            min_requests: 1000.0,
            min_bytes: 500.0 * MIB,
            period: Duration::from_secs(15 * 60),
            baseline_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl DetectionConfig {
    /// Thresholds for a metric
    pub fn thresholds(&self, metric: MetricName) -> &MetricThresholds {
        match metric {
            MetricName::Requests => &self.requests,
            MetricName::Bytes => &self.bytes,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Concurrent account groups, and concurrent accounts within a group
    pub max_workers: usize,
    /// Concurrent distributions within an account
    pub dist_max_workers: usize,
    /// Concurrent alert deliveries
    pub alert_max_workers: usize,
    /// Accounts per group
    pub group_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: 12,
            dist_max_workers: 5,
            alert_max_workers: 5,
            group_size: 50,
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map, lost on restart
    #[default]
    Memory,
    /// Redis server
    Redis,
}

/// Table (key namespace) names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    /// Violation counters
    pub counters: String,
    /// Accounts and baseline cache entries
    pub cache: String,
    /// Failed-account records
    pub failed_accounts: String,
    /// Sent-alert records
    pub sent_alerts: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            counters: "cf_abuse_counter".to_string(),
            cache: "cf_accounts_cache".to_string(),
            failed_accounts: "cf_failed_accounts".to_string(),
            sent_alerts: "cf_sent_alerts".to_string(),
        }
    }
}

/// Per-store ttl durations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreTtls {
    #[serde(with = "humantime_serde")]
    pub accounts_cache: Duration,
    #[serde(with = "humantime_serde")]
    pub baseline_cache: Duration,
    #[serde(with = "humantime_serde")]
    pub failed_accounts: Duration,
    #[serde(with = "humantime_serde")]
    pub counters: Duration,
    #[serde(with = "humantime_serde")]
    pub sent_alerts: Duration,
}

impl Default for StoreTtls {
    fn default() -> Self {
        Self {
            accounts_cache: Duration::from_secs(24 * 60 * 60),
            baseline_cache: Duration::from_secs(6 * 60 * 60),
            failed_accounts: Duration::from_secs(7 * 24 * 60 * 60),
            counters: Duration::from_secs(30 * 24 * 60 * 60),
            sent_alerts: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend
    pub backend: StoreBackend,
    /// Redis URL (redis backend only)
    pub redis_url: String,
    /// How long records stay physically readable after their ttl lapses
    #[serde(with = "humantime_serde")]
    pub retention_grace: Duration,
    /// Key namespaces
    pub tables: TableNames,
    /// Logical ttls
    pub ttls: StoreTtls,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            retention_grace: Duration::from_secs(7 * 24 * 60 * 60),
            tables: TableNames::default(),
            ttls: StoreTtls::default(),
        }
    }
}

/// Cycle timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Time between cycles in `run` mode
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Overall deadline of one cycle
    #[serde(with = "humantime_serde")]
    pub run_deadline: Duration,
    /// Timeout applied to each external call attempt
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Attempts per external call, including the first
    pub retry_attempts: u32,
    /// First backoff delay
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            run_deadline: Duration::from_secs(13 * 60),
            call_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(8),
        }
    }
}

/// Delivery channel kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Telegram Bot API
    #[default]
    Telegram,
    /// Generic JSON webhook
    Webhook,
}

/// Message language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    /// Chinese and English side by side
    #[default]
    Bilingual,
    /// English only
    En,
    /// Chinese only
    Zh,
}

/// Alert channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Channel kind
    pub kind: ChannelKind,
    /// Telegram bot token
    pub telegram_bot_token: String,
    /// Telegram chat id
    pub telegram_chat_id: String,
    /// Telegram API base URL
    pub telegram_api_base: String,
    /// Webhook URL
    pub webhook_url: String,
    /// Target label sent with webhook messages
    pub webhook_target: String,
    /// Message language
    pub locale: Locale,
    /// Hours from UTC used for timestamps in messages
    pub display_timezone_offset: i32,
    /// Organization payer label shown in the message header
    pub payer_label: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::Telegram,
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            telegram_api_base: "https://api.telegram.org".to_string(),
            webhook_url: String::new(),
            webhook_target: "alerts".to_string(),
            locale: Locale::Bilingual,
            display_timezone_offset: 8,
            payer_label: "Unknown".to_string(),
        }
    }
}

impl ChannelConfig {
    /// Target id passed to the channel for every message
    pub fn target_id(&self) -> &str {
        match self.kind {
            ChannelKind::Telegram => &self.telegram_chat_id,
            ChannelKind::Webhook => &self.webhook_target,
        }
    }
}

/// Metrics and organization gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway base URL
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8700".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Serve Prometheus metrics on this address when set
    pub prometheus_listen: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from an optional file and the environment, then validate it
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Defaults go in as the lowest layer so that partial nested
        // overrides merge key by key
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validated()
    }

    /// Consume the configuration, returning it only if it is valid
    pub fn validated(self) -> Result<Self> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(self)
        } else {
            Err(Error::InvalidConfig(problems))
        }
    }

    /// Every validation problem found, empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.aws.region.trim().is_empty() {
            problems.push("aws.region cannot be empty".to_string());
        }
        if self.aws.role_name.trim().is_empty() {
            problems.push("aws.role_name cannot be empty".to_string());
        }

        self.validate_detection(&mut problems);

        let c = &self.concurrency;
        for (name, value) in [
            ("max_workers", c.max_workers),
            ("dist_max_workers", c.dist_max_workers),
            ("alert_max_workers", c.alert_max_workers),
            ("group_size", c.group_size),
        ] {
            if value < 1 {
                problems.push(format!("concurrency.{name} must be at least 1, got {value}"));
            }
        }

        let tables = &self.stores.tables;
        for (name, value) in [
            ("counters", &tables.counters),
            ("cache", &tables.cache),
            ("failed_accounts", &tables.failed_accounts),
            ("sent_alerts", &tables.sent_alerts),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("stores.tables.{name} cannot be empty"));
            }
        }

        let ttls = &self.stores.ttls;
        for (name, value) in [
            ("accounts_cache", ttls.accounts_cache),
            ("baseline_cache", ttls.baseline_cache),
            ("failed_accounts", ttls.failed_accounts),
            ("counters", ttls.counters),
            ("sent_alerts", ttls.sent_alerts),
        ] {
            if value.is_zero() {
                problems.push(format!("stores.ttls.{name} must be positive"));
            }
        }

        if self.stores.backend == StoreBackend::Redis {
            check_url(&mut problems, "stores.redis_url", &self.stores.redis_url);
        }

        let s = &self.schedule;
        for (name, value) in [
            ("interval", s.interval),
            ("run_deadline", s.run_deadline),
            ("call_timeout", s.call_timeout),
        ] {
            if value.is_zero() {
                problems.push(format!("schedule.{name} must be positive"));
            }
        }
        if s.retry_attempts < 1 {
            problems.push("schedule.retry_attempts must be at least 1".to_string());
        }
        if s.retry_base_delay > s.retry_max_delay {
            problems.push("schedule.retry_base_delay cannot exceed retry_max_delay".to_string());
        }

        self.validate_channel(&mut problems);
        check_url(&mut problems, "gateway.base_url", &self.gateway.base_url);

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            problems.push(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            ));
        }

        problems
    }

    fn validate_detection(&self, problems: &mut Vec<String>) {
        let d = &self.detection;

        for (name, value) in [
            ("critical_multiplier", d.critical_multiplier),
            ("warning_multiplier", d.warning_multiplier),
        ] {
            if !value.is_finite() || value <= 1.0 {
                problems.push(format!("detection.{name} must be greater than 1, got {value}"));
            }
        }
        if d.warning_multiplier > d.critical_multiplier {
            problems.push(format!(
                "detection.warning_multiplier ({}) cannot exceed critical_multiplier ({})",
                d.warning_multiplier, d.critical_multiplier
            ));
        }

        if d.critical_duration < 1 {
            problems.push("detection.critical_duration must be at least 1".to_string());
        }
        if d.warning_duration < 1 {
            problems.push("detection.warning_duration must be at least 1".to_string());
        }

        for metric in MetricName::ALL {
            let t = d.thresholds(metric);
            for (name, value) in [
                ("critical_absolute", t.critical_absolute),
                ("warning_absolute", t.warning_absolute),
                ("minimum_baseline", t.minimum_baseline),
            ] {
                if !value.is_finite() || value < 0.0 {
                    problems.push(format!(
                        "detection.{metric}.{name} cannot be negative, got {value}"
                    ));
                }
            }
            if t.warning_absolute > t.critical_absolute {
                problems.push(format!(
                    "detection.{metric}.warning_absolute ({}) cannot exceed critical_absolute ({})",
                    t.warning_absolute, t.critical_absolute
                ));
            }
        }

        for (name, value) in [("min_requests", d.min_requests), ("min_bytes", d.min_bytes)] {
            if !value.is_finite() || value < 0.0 {
                problems.push(format!("detection.{name} cannot be negative, got {value}"));
            }
        }

        if d.period.is_zero() {
            problems.push("detection.period must be positive".to_string());
        }
        if d.baseline_window < d.period {
            problems.push("detection.baseline_window must be at least one period".to_string());
        }
    }

    fn validate_channel(&self, problems: &mut Vec<String>) {
        let ch = &self.channel;
        match ch.kind {
            ChannelKind::Telegram => {
                if ch.telegram_bot_token.trim().is_empty() {
                    problems.push("channel.telegram_bot_token is required".to_string());
                }
                if ch.telegram_chat_id.trim().is_empty() {
                    problems.push("channel.telegram_chat_id is required".to_string());
                }
                check_url(problems, "channel.telegram_api_base", &ch.telegram_api_base);
            }
            ChannelKind::Webhook => {
                if ch.webhook_url.trim().is_empty() {
                    problems.push("channel.webhook_url is required".to_string());
                } else {
                    check_url(problems, "channel.webhook_url", &ch.webhook_url);
                }
            }
        }

        if !(-12..=14).contains(&ch.display_timezone_offset) {
            problems.push(format!(
                "channel.display_timezone_offset must be between -12 and +14, got {}",
                ch.display_timezone_offset
            ));
        }
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.channel.telegram_bot_token.is_empty() {
            copy.channel.telegram_bot_token = "********".to_string();
        }
        if !copy.channel.webhook_url.is_empty() {
            copy.channel.webhook_url = mask_url(&copy.channel.webhook_url);
        }
        copy
    }
}

fn check_url(problems: &mut Vec<String>, field: &str, value: &str) {
    if let Err(e) = url::Url::parse(value) {
        problems.push(format!("{field} is not a valid URL ('{value}'): {e}"));
    }
}

fn mask_url(value: &str) -> String {
    match url::Url::parse(value) {
        Ok(url) => format!("{}://{}/********", url.scheme(), url.host_str().unwrap_or("")),
        Err(_) => "********".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> Config {
        let mut config = Config::default();
        config.channel.telegram_bot_token = "123:abc".to_string();
        config.channel.telegram_chat_id = "-100200300".to_string();
        config
    }

    #[test]
    fn test_defaults_with_credentials_are_valid() {
        let problems = valid().validate();
        assert!(problems.is_empty(), "unexpected problems: {problems:?}");
    }

    #[test]
    fn test_missing_credentials_are_rejected() {
        let problems = Config::default().validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("telegram_bot_token"));
        assert!(problems[1].contains("telegram_chat_id"));
    }

    #[test]
    fn test_validation_aggregates_every_problem() {
        let mut config = valid();
        config.detection.critical_multiplier = 1.0;
        config.detection.warning_multiplier = 0.5;
        config.detection.requests.critical_absolute = -1.0;
        config.concurrency.max_workers = 0;
        config.stores.tables.sent_alerts = String::new();
        config.channel.display_timezone_offset = 20;

        let err = config.validated().unwrap_err();
        let Error::InvalidConfig(problems) = err else {
            panic!("expected InvalidConfig");
        };

        let joined = problems.join("\n");
        assert!(joined.contains("critical_multiplier must be greater than 1"));
        assert!(joined.contains("warning_multiplier must be greater than 1"));
        assert!(joined.contains("requests.critical_absolute cannot be negative"));
        assert!(joined.contains("max_workers must be at least 1"));
        assert!(joined.contains("tables.sent_alerts cannot be empty"));
        assert!(joined.contains("display_timezone_offset"));
        assert!(problems.len() >= 6);
    }

    #[test]
    fn test_warning_multiplier_above_critical_is_rejected() {
        let mut config = valid();
        config.detection.warning_multiplier = 4.0;
        let problems = config.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("cannot exceed critical_multiplier"));
    }

    #[test]
    fn test_webhook_channel_requires_url() {
        let mut config = Config::default();
        config.channel.kind = ChannelKind::Webhook;
        let problems = config.validate();
        assert_eq!(problems, vec!["channel.webhook_url is required".to_string()]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[detection]
critical_multiplier = 4.0
warning_duration = 3
period = "5m"

[concurrency]
max_workers = 20

[channel]
kind = "webhook"
webhook_url = "https://hooks.example.com/cdn"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.detection.critical_multiplier, 4.0);
        assert_eq!(config.detection.warning_duration, 3);
        assert_eq!(config.detection.period, Duration::from_secs(300));
        assert_eq!(config.concurrency.max_workers, 20);
        // untouched values keep their defaults
        assert_eq!(config.concurrency.dist_max_workers, 5);
        assert_eq!(config.detection.requests.critical_absolute, 2500.0);
    }

    #[test]
    fn test_partial_nested_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[detection.bytes]
critical_absolute = 2147483648.0

[channel]
telegram_bot_token = "123:abc"
telegram_chat_id = "-100200300"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.detection.bytes.critical_absolute, 2147483648.0);
        assert_eq!(config.detection.bytes.minimum_baseline, 25.0 * MIB);
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let redacted = valid().redacted();
        assert_eq!(redacted.channel.telegram_bot_token, "********");
        assert_eq!(redacted.channel.telegram_chat_id, "-100200300");
    }
}
