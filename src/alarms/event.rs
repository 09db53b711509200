//! Alarm notification payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{Alarm, AlarmState};

/// State notification published on every evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmEvent {
    pub alarm_name: String,
    pub alarm_description: String,
    pub new_state_value: AlarmState,
    pub new_state_reason: String,
    pub old_state_value: AlarmState,
    pub state_change_time: DateTime<Utc>,
    pub trigger: Trigger,
}

/// Metric and rule that produced the event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Trigger {
    pub metric_name: String,
    pub namespace: String,
    pub statistic: String,
    /// Seconds
    pub period: u64,
    pub evaluation_periods: u32,
    pub datapoints_to_alarm: u32,
    pub comparison_operator: String,
    pub threshold: f64,
    pub treat_missing_data: String,
    pub dimensions: Vec<DimensionPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionPair {
    pub name: String,
    pub value: String,
}

impl AlarmEvent {
    /// Build the event for `alarm` moving from `old_state` to its current state
    pub fn from_alarm(alarm: &Alarm, old_state: AlarmState, at: DateTime<Utc>) -> Self {
        let rule = &alarm.rule;
        Self {
            alarm_name: alarm.name.clone(),
            alarm_description: alarm.description.clone(),
            new_state_value: alarm.state,
            new_state_reason: alarm.state_reason.clone().unwrap_or_default(),
            old_state_value: old_state,
            state_change_time: at,
            trigger: Trigger {
                metric_name: rule.kind.metric_name().to_string(),
                namespace: alarm.namespace.clone(),
                statistic: rule.statistic.to_string().to_uppercase(),
                period: rule.period.as_secs(),
                evaluation_periods: rule.evaluation_periods,
                datapoints_to_alarm: rule.datapoints_to_alarm,
                comparison_operator: rule.comparison.to_string(),
                threshold: rule.threshold,
                treat_missing_data: rule.missing_data.to_string(),
                dimensions: vec![DimensionPair {
                    name: crate::metrics::URL_DIMENSION.to_string(),
                    value: alarm.target.clone(),
                }],
            },
        }
    }

    /// True when the state changed rather than being re-confirmed
    pub fn is_transition(&self) -> bool {
        self.new_state_value != self.old_state_value
    }

    /// JSON message as delivered to subscribers
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
