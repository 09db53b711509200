use serde::{Deserialize, Serialize};

/// Longest reason kept on a record, in characters
pub const MAX_REASON_CHARS: usize = 1000;

/// Longest raw payload copy kept on a record, in characters
pub const MAX_RAW_CHARS: usize = 3500;

/// One row of the alarm audit log.
///
/// Keyed by (`alarm_name`, `timestamp`); the timestamp is assigned when the
/// notification is processed, so rows are in processing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmLogRecord {
    #[serde(rename = "AlarmName")]
    pub alarm_name: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "NewStateValue")]
    pub new_state: String,
    #[serde(rename = "NewStateReason")]
    pub reason: String,
    #[serde(rename = "MetricName")]
    pub metric_name: String,
    #[serde(rename = "Namespace")]
    pub namespace: String,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    #[serde(rename = "Raw")]
    pub raw: String,
}

/// First `max` characters of `s`
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("", 3), "");
        assert_eq!(truncate_chars("äöüß", 2), "äö");
    }

    #[test]
    fn test_record_field_names() {
        let record = AlarmLogRecord {
            alarm_name: "AvailAlarmhttpsexamplecom".into(),
            timestamp: "2026-10-19T10:00:00.000000+00:00".into(),
            new_state: "ALARM".into(),
            reason: "down".into(),
            metric_name: "Availability".into(),
            namespace: "WebsiteHealth".into(),
            url: None,
            raw: "{}".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["AlarmName"], "AvailAlarmhttpsexamplecom");
        assert_eq!(json["NewStateValue"], "ALARM");
        assert!(json["URL"].is_null());
    }
}
