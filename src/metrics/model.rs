//! Metric sample and aggregate types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Dimension name that scopes canary metrics to one target
pub const URL_DIMENSION: &str = "URL";

/// Metrics emitted by the prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    Availability,
    Latency,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Availability => "Availability",
            MetricName::Latency => "Latency",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            MetricName::Availability => Unit::Count,
            MetricName::Latency => Unit::Milliseconds,
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Count,
    Milliseconds,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Count => f.write_str("Count"),
            Unit::Milliseconds => f.write_str("Milliseconds"),
        }
    }
}

/// Named tags attached to a metric. Ordered so equal sets compare and hash equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions(BTreeMap<String, String>);

impl Dimensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single `URL` dimension used by every canary metric
    pub fn for_url(url: impl Into<String>) -> Self {
        Self::new().with(URL_DIMENSION, url)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.get(URL_DIMENSION)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One published measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub namespace: String,
    pub metric_name: MetricName,
    pub dimensions: Dimensions,
    pub value: f64,
    pub unit: Unit,
    /// Publish time, unix millis
    pub timestamp: i64,
}

impl MetricSample {
    /// Build a sample stamped with the current time
    pub fn now(
        namespace: impl Into<String>,
        metric_name: MetricName,
        dimensions: Dimensions,
        value: f64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            metric_name,
            dimensions,
            value,
            unit: metric_name.unit(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Statistic applied to every period bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    #[default]
    Average,
    Sum,
    Minimum,
    Maximum,
    SampleCount,
}

impl Statistic {
    /// SQL aggregate function name for remote queries
    pub fn sql_function(&self) -> &'static str {
        match self {
            Statistic::Average => "AVG",
            Statistic::Sum => "SUM",
            Statistic::Minimum => "MIN",
            Statistic::Maximum => "MAX",
            Statistic::SampleCount => "COUNT",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Statistic::Average => "Average",
            Statistic::Sum => "Sum",
            Statistic::Minimum => "Minimum",
            Statistic::Maximum => "Maximum",
            Statistic::SampleCount => "SampleCount",
        };
        f.write_str(s)
    }
}

/// One bucket of an aggregated series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedDatapoint {
    /// Bucket start, unix millis
    pub timestamp: i64,
    pub value: f64,
    pub sample_count: u64,
    pub statistic: Statistic,
}

/// Parameters of an aggregate read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub namespace: String,
    pub metric_name: MetricName,
    pub dimensions: Dimensions,
    /// Inclusive, unix millis
    pub start: i64,
    /// Exclusive, unix millis
    pub end: i64,
    #[serde(with = "period_secs")]
    pub period: Duration,
    #[serde(default)]
    pub statistic: Statistic,
}

impl AggregateQuery {
    pub fn period_ms(&self) -> i64 {
        self.period.as_millis() as i64
    }
}

/// Start of the bucket containing `timestamp`
pub fn bucket_start(timestamp: i64, period_ms: i64) -> i64 {
    timestamp.div_euclid(period_ms) * period_ms
}

/// Running statistics for one bucket
#[derive(Debug, Clone, Copy)]
pub(crate) struct BucketStats {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl BucketStats {
    pub(crate) fn new() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub(crate) fn accumulate(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn result(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Average => self.sum / self.count as f64,
            Statistic::Sum => self.sum,
            Statistic::Minimum => self.min,
            Statistic::Maximum => self.max,
            Statistic::SampleCount => self.count as f64,
        }
    }
}

mod period_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start_alignment() {
        let period = 300_000;
        assert_eq!(bucket_start(0, period), 0);
        assert_eq!(bucket_start(299_999, period), 0);
        assert_eq!(bucket_start(300_000, period), 300_000);
        assert_eq!(bucket_start(-1, period), -300_000);
    }

    #[test]
    fn test_bucket_stats() {
        let mut stats = BucketStats::new();
        for v in [1.0, 0.0, 1.0, 1.0] {
            stats.accumulate(v);
        }
        assert_eq!(stats.result(Statistic::Average), 0.75);
        assert_eq!(stats.result(Statistic::Sum), 3.0);
        assert_eq!(stats.result(Statistic::Minimum), 0.0);
        assert_eq!(stats.result(Statistic::Maximum), 1.0);
        assert_eq!(stats.result(Statistic::SampleCount), 4.0);
    }

    #[test]
    fn test_dimensions_for_url() {
        let dims = Dimensions::for_url("https://example.com");
        assert_eq!(dims.url(), Some("https://example.com"));
        assert_eq!(dims.len(), 1);
        assert_eq!(MetricName::Latency.unit(), Unit::Milliseconds);
    }
}
