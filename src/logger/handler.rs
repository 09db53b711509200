//! Alarm logger: one audit record per delivered notification

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value as Json;
use std::sync::Arc;

use super::record::{truncate_chars, AlarmLogRecord, MAX_RAW_CHARS, MAX_REASON_CHARS};
use super::store::{RecordStore, StoreError};
use crate::alarms::{AlarmEvent, AlarmSubscriber, NotifierError};
use crate::metrics::URL_DIMENSION;

/// Result of logging one notification
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    /// Parsed and stored with its structured fields
    Logged(AlarmLogRecord),
    /// Payload was not a JSON object; stored under `RawMessage`
    Degraded(AlarmLogRecord),
}

impl LogOutcome {
    pub fn record(&self) -> &AlarmLogRecord {
        match self {
            LogOutcome::Logged(record) | LogOutcome::Degraded(record) => record,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, LogOutcome::Degraded(_))
    }
}

/// Writes every alarm notification to a [`RecordStore`].
///
/// Delivery is at-least-once and no idempotency key is applied: a notification
/// delivered twice is logged twice. Parse failures are absorbed into a degraded
/// record; storage failures are returned so the sender can redeliver.
pub struct AlarmLogger {
    store: Arc<dyn RecordStore>,
}

impl AlarmLogger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Log one notification message
    pub async fn on_message(&self, message: &str) -> Result<LogOutcome, LoggerError> {
        let (payload, degraded) = match serde_json::from_str::<Json>(message) {
            Ok(json @ Json::Object(_)) => (json, false),
            _ => (serde_json::json!({ "RawMessage": message }), true),
        };

        let record = build_record(&payload);
        self.store.put(&record).await?;

        if degraded {
            tracing::warn!(
                timestamp = %record.timestamp,
                "Alarm notification was not a JSON object, stored raw message"
            );
            Ok(LogOutcome::Degraded(record))
        } else {
            tracing::debug!(
                alarm = %record.alarm_name,
                state = %record.new_state,
                timestamp = %record.timestamp,
                "Alarm notification logged"
            );
            Ok(LogOutcome::Logged(record))
        }
    }

    /// Log every message of a `{"Records": [{"Sns": {"Message": ...}}]}` envelope.
    ///
    /// Stops at the first storage failure. Returns the number of records written.
    pub async fn on_envelope(&self, envelope: &Json) -> Result<usize, LoggerError> {
        let records = envelope
            .get("Records")
            .and_then(Json::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut written = 0;
        for entry in records {
            let message = match entry.get("Sns").and_then(|sns| sns.get("Message")) {
                Some(Json::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            self.on_message(&message).await?;
            written += 1;
        }
        Ok(written)
    }
}

fn field(payload: &Json, key: &str, default: &str) -> String {
    match payload.get(key) {
        Some(Json::String(s)) => s.clone(),
        Some(Json::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

fn build_record(payload: &Json) -> AlarmLogRecord {
    let trigger = payload.get("Trigger");
    let trigger_field = |key: &str, default: &str| match trigger {
        Some(t) => field(t, key, default),
        None => default.to_string(),
    };

    let dimensions = trigger
        .and_then(|t| t.get("Dimensions"))
        .and_then(Json::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    AlarmLogRecord {
        alarm_name: field(payload, "AlarmName", "UnknownAlarm"),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        new_state: field(payload, "NewStateValue", "UNKNOWN"),
        reason: truncate_chars(&field(payload, "NewStateReason", ""), MAX_REASON_CHARS),
        metric_name: trigger_field("MetricName", "Unknown"),
        namespace: trigger_field("Namespace", ""),
        url: url_from_dimensions(dimensions),
        raw: truncate_chars(&payload.to_string(), MAX_RAW_CHARS),
    }
}

/// Value of the `URL` dimension; key names may be `name`/`Name` and `value`/`Value`
pub fn url_from_dimensions(dimensions: &[Json]) -> Option<String> {
    dimensions.iter().find_map(|d| {
        let is_url = ["name", "Name"]
            .iter()
            .any(|k| d.get(k).and_then(Json::as_str) == Some(URL_DIMENSION));
        if !is_url {
            return None;
        }
        ["value", "Value"]
            .iter()
            .find_map(|k| match d.get(k) {
                Some(Json::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Json::Null) | None => None,
                Some(Json::String(_)) => None,
                Some(other) => Some(other.to_string()),
            })
    })
}

/// Feeds notifications from the in-process bus into an [`AlarmLogger`]
pub struct AlarmLoggerSubscriber {
    logger: Arc<AlarmLogger>,
}

impl AlarmLoggerSubscriber {
    pub fn new(logger: Arc<AlarmLogger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl AlarmSubscriber for AlarmLoggerSubscriber {
    fn name(&self) -> &str {
        "alarm-logger"
    }

    async fn deliver(&self, _event: &AlarmEvent, message: &str) -> Result<(), NotifierError> {
        self.logger
            .on_message(message)
            .await
            .map(|_| ())
            .map_err(|e| NotifierError::Subscriber(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("Failed to store alarm record: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::store::MemoryRecordStore;
    use serde_json::json;

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn put(&self, _: &AlarmLogRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("throttled".into()))
        }

        async fn query(&self, _: &str, _: usize) -> Result<Vec<AlarmLogRecord>, StoreError> {
            Ok(Vec::new())
        }

        fn len(&self) -> usize {
            0
        }
    }

    fn logger() -> (AlarmLogger, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        (AlarmLogger::new(store.clone()), store)
    }

    fn message(dimension: Json) -> String {
        json!({
            "AlarmName": "AvailAlarmhttpsexamplecom",
            "NewStateValue": "ALARM",
            "NewStateReason": "Threshold Crossed",
            "Trigger": {
                "MetricName": "Availability",
                "Namespace": "WebsiteHealth",
                "Dimensions": [dimension],
            },
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_well_formed_message_with_any_key_case() {
        let (logger, store) = logger();

        for dimension in [
            json!({ "name": "URL", "value": "https://example.com" }),
            json!({ "Name": "URL", "Value": "https://example.com" }),
            json!({ "name": "URL", "Value": "https://example.com" }),
        ] {
            let outcome = logger.on_message(&message(dimension)).await.unwrap();
            assert!(!outcome.is_degraded());
            let record = outcome.record();
            assert_eq!(record.alarm_name, "AvailAlarmhttpsexamplecom");
            assert_eq!(record.new_state, "ALARM");
            assert_eq!(record.metric_name, "Availability");
            assert_eq!(record.namespace, "WebsiteHealth");
            assert_eq!(record.url.as_deref(), Some("https://example.com"));
        }
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_message_is_stored_raw() {
        let (logger, store) = logger();

        let outcome = logger.on_message("alarm fired!").await.unwrap();
        assert!(outcome.is_degraded());
        let record = outcome.record();
        assert_eq!(record.alarm_name, "UnknownAlarm");
        assert_eq!(record.new_state, "UNKNOWN");
        assert_eq!(record.metric_name, "Unknown");
        assert_eq!(record.namespace, "");
        assert_eq!(record.url, None);
        assert_eq!(record.raw, r#"{"RawMessage":"alarm fired!"}"#);

        let outcome = logger.on_message("[1, 2]").await.unwrap();
        assert!(outcome.is_degraded());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_long_fields_are_truncated() {
        let (logger, _) = logger();
        let payload = json!({
            "AlarmName": "LatencyAlarmhttpsexamplecom",
            "NewStateValue": "OK",
            "NewStateReason": "r".repeat(1500),
            "Padding": "p".repeat(5000),
        })
        .to_string();

        let outcome = logger.on_message(&payload).await.unwrap();
        let record = outcome.record();
        assert_eq!(record.reason.chars().count(), 1000);
        assert_eq!(record.raw.chars().count(), 3500);
        assert_eq!(record.metric_name, "Unknown");
    }

    #[tokio::test]
    async fn test_duplicate_delivery_writes_two_records() {
        let (logger, store) = logger();
        let msg = message(json!({ "name": "URL", "value": "https://example.com" }));

        tokio_test::assert_ok!(logger.on_message(&msg).await);
        tokio_test::assert_ok!(logger.on_message(&msg).await);

        let rows = store.query("AvailAlarmhttpsexamplecom", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_timestamp_is_rfc3339_utc() {
        let (logger, _) = logger();
        let outcome = logger.on_message("{}").await.unwrap();
        let timestamp = &outcome.record().timestamp;
        assert!(timestamp.ends_with("+00:00"));
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced() {
        let logger = AlarmLogger::new(Arc::new(BrokenStore));
        let err = tokio_test::assert_err!(logger.on_message("not json").await);
        assert!(matches!(err, LoggerError::Store(StoreError::Unavailable(_))));

        let envelope = serde_json::json!({
            "Records": [{ "Sns": { "Message": "a" } }, { "Sns": { "Message": "b" } }]
        });
        tokio_test::assert_err!(logger.on_envelope(&envelope).await);
    }

    #[tokio::test]
    async fn test_envelope_records() {
        let (logger, store) = logger();
        let envelope = json!({
            "Records": [
                {
                    "Sns": {
                        "Message": message(json!({ "Name": "URL", "Value": "https://a.example" }))
                    }
                },
                { "Sns": { "Message": "plain text" } },
                { "Sns": {} },
            ]
        });

        assert_eq!(logger.on_envelope(&envelope).await.unwrap(), 3);
        assert_eq!(store.len(), 3);
        assert_eq!(logger.on_envelope(&json!({})).await.unwrap(), 0);
    }

    #[test]
    fn test_url_from_dimensions() {
        let dims = vec![
            json!({ "name": "Region", "value": "eu" }),
            json!({ "Name": "URL", "Value": "https://example.com" }),
        ];
        assert_eq!(url_from_dimensions(&dims).as_deref(), Some("https://example.com"));
        assert_eq!(url_from_dimensions(&[]), None);
        assert_eq!(url_from_dimensions(&[json!({ "url": "x" })]), None);
    }
}
