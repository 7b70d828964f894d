//! Alert message rendering
//!
//! Rendering is pure. Byte values use 1024-based units, request counts get
//! thousands separators, and timestamps are shown in a fixed display
//! offset.

use chrono::{FixedOffset, Offset, Utc};

use crate::config::{ChannelConfig, Locale};
use crate::models::{Alert, MetricName, Severity};

const BYTE_UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Message layout and presentation settings
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    /// Language
    pub locale: Locale,
    /// Hours east of UTC for displayed timestamps
    pub display_offset_hours: i32,
    /// Organization payer label in the header
    pub payer_label: String,
}

impl MessageTemplate {
    /// Template from channel settings
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            locale: config.locale,
            display_offset_hours: config.display_timezone_offset,
            payer_label: config.payer_label.clone(),
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.display_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self::from_config(&ChannelConfig::default())
    }
}

struct Labels {
    title: &'static str,
    payer: &'static str,
    account: &'static str,
    email: &'static str,
    distribution: &'static str,
    metric: &'static str,
    current: &'static str,
    baseline: &'static str,
    threshold: &'static str,
    change: &'static str,
    consecutive: &'static str,
    time: &'static str,
}

const EN: Labels = Labels {
    title: "CDN Traffic Alert",
    payer: "Payer",
    account: "Account",
    email: "Email",
    distribution: "Distribution",
    metric: "Metric",
    current: "Current",
    baseline: "Baseline",
    threshold: "Threshold",
    change: "Change",
    consecutive: "Consecutive periods",
    time: "Time",
};

const ZH: Labels = Labels {
    title: "CDN 流量告警",
    payer: "付款账户",
    account: "账户",
    email: "邮箱",
    distribution: "分发",
    metric: "指标",
    current: "当前值",
    baseline: "基线",
    threshold: "阈值",
    change: "变化",
    consecutive: "连续周期",
    time: "时间",
};

fn label(locale: Locale, pick: fn(&Labels) -> &'static str) -> String {
    match locale {
        Locale::Bilingual => format!("{} | {}", pick(&ZH), pick(&EN)),
        Locale::En => pick(&EN).to_string(),
        Locale::Zh => pick(&ZH).to_string(),
    }
}

fn severity_text(locale: Locale, severity: Severity) -> String {
    let (icon, zh, en) = match severity {
        Severity::Critical => ("🚨", "严重", "CRITICAL"),
        Severity::Warning => ("⚠️", "警告", "WARNING"),
        Severity::None => ("ℹ️", "正常", "OK"),
    };
    match locale {
        Locale::Bilingual => format!("{icon} [{zh} | {en}]"),
        Locale::En => format!("{icon} [{en}]"),
        Locale::Zh => format!("{icon} [{zh}]"),
    }
}

fn metric_text(locale: Locale, metric: MetricName) -> String {
    let (zh, en) = match metric {
        MetricName::Requests => ("请求数", "Requests"),
        MetricName::Bytes => ("下载流量", "Bytes downloaded"),
    };
    match locale {
        Locale::Bilingual => format!("{zh} | {en}"),
        Locale::En => en.to_string(),
        Locale::Zh => zh.to_string(),
    }
}

/// Render an alert as a plain-text message
pub fn render(template: &MessageTemplate, alert: &Alert) -> String {
    let locale = template.locale;
    let metric = alert.key.metric;
    let at = alert
        .detected_at
        .with_timezone(&template.offset())
        .format("%a, %d %b %Y %H:%M:%S %z");

    let lines = [
        format!(
            "{} {}",
            severity_text(locale, alert.severity),
            label(locale, |l| l.title)
        ),
        format!("{}: {}", label(locale, |l| l.payer), template.payer_label),
        format!(
            "{}: {} ({})",
            label(locale, |l| l.account),
            alert.account_name,
            alert.key.account_id
        ),
        format!("{}: {}", label(locale, |l| l.email), alert.account_email),
        format!(
            "{}: {}",
            label(locale, |l| l.distribution),
            alert.key.distribution_id
        ),
        format!("{}: {}", label(locale, |l| l.metric), metric_text(locale, metric)),
        format!(
            "{}: {}",
            label(locale, |l| l.current),
            format_value(metric, alert.current_value)
        ),
        format!(
            "{}: {}",
            label(locale, |l| l.baseline),
            format_value(metric, alert.baseline_value)
        ),
        format!(
            "{}: {} ({}×)",
            label(locale, |l| l.threshold),
            format_value(metric, alert.threshold_value()),
            alert.multiplier
        ),
        format!(
            "{}: {:+.1}%",
            label(locale, |l| l.change),
            alert.percentage_change
        ),
        format!(
            "{}: {}",
            label(locale, |l| l.consecutive),
            alert.consecutive_count
        ),
        format!("{}: {}", label(locale, |l| l.time), at),
    ];

    lines.join("\n")
}

fn format_value(metric: MetricName, value: f64) -> String {
    match metric {
        MetricName::Requests => format_count(value),
        MetricName::Bytes => format_bytes(value),
    }
}

/// Human-readable byte size with 1024-based units
pub fn format_bytes(bytes: f64) -> String {
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", BYTE_UNITS[unit])
    } else {
        format!("{value:.2} {}", BYTE_UNITS[unit])
    }
}

/// Whole number with thousands separators
pub fn format_count(value: f64) -> String {
    let rounded = value.max(0.0).round() as u64;
    let digits = rounded.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViolationKey;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn alert(metric: MetricName) -> Alert {
        Alert {
            key: ViolationKey::new("111122223333", "E2ABCDEF", metric),
            account_name: "prod-web".to_string(),
            account_email: "ops@example.com".to_string(),
            severity: Severity::Critical,
            current_value: 12_345.0,
            baseline_value: 1_000.0,
            multiplier: 3.0,
            percentage_change: 1134.5,
            consecutive_count: 1,
            detected_at: Utc.with_ymd_and_hms(2026, 2, 3, 6, 54, 48).unwrap(),
        }
    }

    #[rstest]
    #[case(0.0, "0 B")]
    #[case(512.0, "512 B")]
    #[case(1536.0, "1.50 KB")]
    #[case(1.25 * 1024.0 * 1024.0 * 1024.0, "1.25 GB")]
    #[case(3.0 * 1024f64.powi(5), "3.00 PB")]
    #[case(2048.0 * 1024f64.powi(5), "2048.00 PB")]
    fn test_format_bytes(#[case] bytes: f64, #[case] expected: &str) {
        assert_eq!(format_bytes(bytes), expected);
    }

    #[rstest]
    #[case(0.0, "0")]
    #[case(999.0, "999")]
    #[case(1000.0, "1,000")]
    #[case(1234567.4, "1,234,567")]
    fn test_format_count(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(format_count(value), expected);
    }

    #[test]
    fn test_english_message() {
        let template = MessageTemplate {
            locale: Locale::En,
            display_offset_hours: 8,
            payer_label: "Org Payer".to_string(),
        };
        let text = render(&template, &alert(MetricName::Requests));

        assert_eq!(
            text,
            "🚨 [CRITICAL] CDN Traffic Alert\n\
             Payer: Org Payer\n\
             Account: prod-web (111122223333)\n\
             Email: ops@example.com\n\
             Distribution: E2ABCDEF\n\
             Metric: Requests\n\
             Current: 12,345\n\
             Baseline: 1,000\n\
             Threshold: 3,000 (3×)\n\
             Change: +1134.5%\n\
             Consecutive periods: 1\n\
             Time: Tue, 03 Feb 2026 14:54:48 +0800"
        );
    }

    #[test]
    fn test_bilingual_message_has_both_languages() {
        let text = render(&MessageTemplate::default(), &alert(MetricName::Bytes));
        assert!(text.starts_with("🚨 [严重 | CRITICAL] CDN 流量告警 | CDN Traffic Alert"));
        assert!(text.contains("下载流量 | Bytes downloaded"));
        assert!(text.contains("当前值 | Current: 12.06 KB"));
        assert!(text.contains("+0800"));
    }

    #[test]
    fn test_chinese_message_uses_offset() {
        let template = MessageTemplate {
            locale: Locale::Zh,
            display_offset_hours: 0,
            payer_label: "Unknown".to_string(),
        };
        let text = render(&template, &alert(MetricName::Requests));
        assert!(text.contains("时间: Tue, 03 Feb 2026 06:54:48 +0000"));
        assert!(!text.contains("Current"));
    }
}
