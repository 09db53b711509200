//! Alarm configuration types

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use super::AlarmError;
use crate::metrics::{MetricName, Statistic};

/// Availability threshold: any failed probe inside a period breaches
pub const AVAILABILITY_THRESHOLD: f64 = 0.99;

/// Default latency threshold in milliseconds
pub const DEFAULT_LATENCY_THRESHOLD_MS: f64 = 1500.0;

/// Default evaluation period
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(300);

const MAX_FRAGMENT_LEN: usize = 60;

/// Alarm state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmState {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ALARM")]
    Alarm,
    #[default]
    #[serde(rename = "INSUFFICIENT_DATA")]
    InsufficientData,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Ok => "OK",
            AlarmState::Alarm => "ALARM",
            AlarmState::InsufficientData => "INSUFFICIENT_DATA",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which probe metric an alarm watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmKind {
    Availability,
    Latency,
}

impl AlarmKind {
    pub const ALL: [AlarmKind; 2] = [AlarmKind::Availability, AlarmKind::Latency];

    pub fn metric_name(&self) -> MetricName {
        match self {
            AlarmKind::Availability => MetricName::Availability,
            AlarmKind::Latency => MetricName::Latency,
        }
    }

    fn name_prefix(&self) -> &'static str {
        match self {
            AlarmKind::Availability => "AvailAlarm",
            AlarmKind::Latency => "LatencyAlarm",
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric_name().as_str())
    }
}

/// Comparison between a datapoint and the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    LessThanThreshold,
    GreaterThanThreshold,
    LessThanOrEqualToThreshold,
    GreaterThanOrEqualToThreshold,
}

impl ComparisonOperator {
    /// True when `value` breaches `threshold`
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::LessThanThreshold => value < threshold,
            ComparisonOperator::GreaterThanThreshold => value > threshold,
            ComparisonOperator::LessThanOrEqualToThreshold => value <= threshold,
            ComparisonOperator::GreaterThanOrEqualToThreshold => value >= threshold,
        }
    }

    pub fn phrase(&self) -> &'static str {
        match self {
            ComparisonOperator::LessThanThreshold => "less than",
            ComparisonOperator::GreaterThanThreshold => "greater than",
            ComparisonOperator::LessThanOrEqualToThreshold => "less than or equal to",
            ComparisonOperator::GreaterThanOrEqualToThreshold => "greater than or equal to",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a period without any datapoint is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissingDataPolicy {
    /// Missing data counts as a breach
    Breaching,
    /// Missing data counts as within threshold
    NotBreaching,
    /// Missing periods are skipped; all-missing yields INSUFFICIENT_DATA
    Missing,
}

impl fmt::Display for MissingDataPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingDataPolicy::Breaching => f.write_str("breaching"),
            MissingDataPolicy::NotBreaching => f.write_str("notBreaching"),
            MissingDataPolicy::Missing => f.write_str("missing"),
        }
    }
}

/// Threshold rule evaluated once per period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRule {
    pub kind: AlarmKind,
    pub threshold: f64,
    pub comparison: ComparisonOperator,
    pub missing_data: MissingDataPolicy,
    #[serde(with = "duration_serde")]
    pub period: Duration,
    /// Number of most recent periods examined
    pub evaluation_periods: u32,
    /// Breaching periods among those needed for ALARM
    pub datapoints_to_alarm: u32,
    #[serde(default)]
    pub statistic: Statistic,
}

impl AlarmRule {
    /// Availability below 0.99 averaged over the period. Silence is an outage.
    pub fn availability() -> Self {
        Self {
            kind: AlarmKind::Availability,
            threshold: AVAILABILITY_THRESHOLD,
            comparison: ComparisonOperator::LessThanThreshold,
            missing_data: MissingDataPolicy::Breaching,
            period: DEFAULT_PERIOD,
            evaluation_periods: 1,
            datapoints_to_alarm: 1,
            statistic: Statistic::Average,
        }
    }

    /// Average latency above `threshold_ms`. Missing latency never alarms on its own.
    pub fn latency(threshold_ms: f64) -> Self {
        Self {
            kind: AlarmKind::Latency,
            threshold: threshold_ms,
            comparison: ComparisonOperator::GreaterThanThreshold,
            missing_data: MissingDataPolicy::NotBreaching,
            period: DEFAULT_PERIOD,
            evaluation_periods: 1,
            datapoints_to_alarm: 1,
            statistic: Statistic::Average,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_missing_data(mut self, policy: MissingDataPolicy) -> Self {
        self.missing_data = policy;
        self
    }

    /// Require `datapoints` breaching periods out of the last `periods`
    pub fn with_evaluation(mut self, datapoints: u32, periods: u32) -> Self {
        self.datapoints_to_alarm = datapoints;
        self.evaluation_periods = periods;
        self
    }

    pub fn period_ms(&self) -> i64 {
        self.period.as_millis() as i64
    }

    pub fn validate(&self) -> Result<(), AlarmError> {
        if self.period < Duration::from_secs(1) {
            return Err(AlarmError::InvalidRule(format!(
                "{} period must be at least one second",
                self.kind
            )));
        }
        if self.evaluation_periods == 0 || self.datapoints_to_alarm == 0 {
            return Err(AlarmError::InvalidRule(format!(
                "{} evaluation needs at least one period",
                self.kind
            )));
        }
        if self.datapoints_to_alarm > self.evaluation_periods {
            return Err(AlarmError::InvalidRule(format!(
                "{} datapoints to alarm ({}) exceeds evaluation periods ({})",
                self.kind, self.datapoints_to_alarm, self.evaluation_periods
            )));
        }
        if !self.threshold.is_finite() {
            return Err(AlarmError::InvalidRule(format!(
                "{} threshold must be finite",
                self.kind
            )));
        }
        Ok(())
    }

    /// Human-readable description for an alarm on `target`
    pub fn describe(&self, target: &str) -> String {
        match self.kind {
            AlarmKind::Availability => format!("Availability below 1 for {}", target),
            AlarmKind::Latency => format!("Latency above {} ms for {}", self.threshold, target),
        }
    }
}

/// Pair of rules applied to every target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRules {
    pub availability: AlarmRule,
    pub latency: AlarmRule,
}

impl AlarmRules {
    pub fn new(latency_threshold_ms: f64, period: Duration) -> Self {
        Self {
            availability: AlarmRule::availability().with_period(period),
            latency: AlarmRule::latency(latency_threshold_ms).with_period(period),
        }
    }

    pub fn for_kind(&self, kind: AlarmKind) -> &AlarmRule {
        match kind {
            AlarmKind::Availability => &self.availability,
            AlarmKind::Latency => &self.latency,
        }
    }

    pub fn validate(&self) -> Result<(), AlarmError> {
        self.availability.validate()?;
        self.latency.validate()
    }
}

impl Default for AlarmRules {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_THRESHOLD_MS, DEFAULT_PERIOD)
    }
}

/// Strip a target down to an identifier fragment: ASCII alphanumerics, at most 60 chars
pub fn id_fragment(target: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^A-Za-z0-9]").expect("valid regex"));

    let fragment: String = re.replace_all(target, "").chars().take(MAX_FRAGMENT_LEN).collect();
    if fragment.is_empty() {
        "URL".to_string()
    } else {
        fragment
    }
}

/// Registry name of the alarm of `kind` on `target`
pub fn alarm_name(kind: AlarmKind, target: &str) -> String {
    format!("{}{}", kind.name_prefix(), id_fragment(target))
}

/// Runtime alarm: one per (target, kind)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub name: String,
    pub description: String,
    pub target: String,
    pub namespace: String,
    pub rule: AlarmRule,
    #[serde(default)]
    pub state: AlarmState,
    /// Reason attached to the current state
    pub state_reason: Option<String>,
    /// Last successful evaluation (unix millis)
    pub last_evaluated: Option<i64>,
    /// Last state change (unix millis)
    pub last_transition: Option<i64>,
    /// Last backend error; cleared on the next successful evaluation
    pub last_error: Option<String>,
}

impl Alarm {
    pub fn new(target: impl Into<String>, namespace: impl Into<String>, rule: AlarmRule) -> Self {
        let target = target.into();
        Self {
            name: alarm_name(rule.kind, &target),
            description: rule.describe(&target),
            target,
            namespace: namespace.into(),
            rule,
            state: AlarmState::default(),
            state_reason: None,
            last_evaluated: None,
            last_transition: None,
            last_error: None,
        }
    }

    pub fn kind(&self) -> AlarmKind {
        self.rule.kind
    }
}

/// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationHelper {
        secs: u64,
        #[serde(default)]
        nanos: u32,
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        DurationHelper {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = DurationHelper::deserialize(deserializer)?;
        Ok(Duration::new(helper.secs, helper.nanos))
    }
}
