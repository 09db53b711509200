//! In-process metric sink

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::Duration;

use super::model::{bucket_start, BucketStats, Dimensions, MetricName, MetricSample};
use super::{AggregateQuery, AggregatedDatapoint, MetricSink, MetricsError};

/// Identity of one time series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    namespace: String,
    metric_name: MetricName,
    dimensions: Dimensions,
}

/// Concurrent in-memory series store with a bounded retention window
pub struct MemoryMetricSink {
    series: DashMap<SeriesKey, Vec<(i64, f64)>>,
    retention_ms: i64,
}

impl MemoryMetricSink {
    pub fn new() -> Self {
        Self::with_retention(Duration::from_secs(24 * 3600))
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            series: DashMap::new(),
            retention_ms: retention.as_millis() as i64,
        }
    }

    /// Number of distinct series held
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Raw `(timestamp, value)` points of one series, oldest first
    pub fn points(
        &self,
        namespace: &str,
        metric_name: MetricName,
        dimensions: &Dimensions,
    ) -> Vec<(i64, f64)> {
        let key = SeriesKey {
            namespace: namespace.to_string(),
            metric_name,
            dimensions: dimensions.clone(),
        };
        self.series
            .get(&key)
            .map(|points| points.clone())
            .unwrap_or_default()
    }

    fn insert(&self, namespace: &str, sample: &MetricSample) {
        let key = SeriesKey {
            namespace: namespace.to_string(),
            metric_name: sample.metric_name,
            dimensions: sample.dimensions.clone(),
        };

        let mut points = self.series.entry(key).or_default();
        let pos = points.partition_point(|(ts, _)| *ts <= sample.timestamp);
        points.insert(pos, (sample.timestamp, sample.value));

        // Retention is relative to the newest point so replayed history is kept consistent
        if let Some(&(newest, _)) = points.last() {
            let cutoff = newest - self.retention_ms;
            let expired = points.partition_point(|(ts, _)| *ts < cutoff);
            if expired > 0 {
                points.drain(..expired);
            }
        }
    }
}

impl Default for MemoryMetricSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSink for MemoryMetricSink {
    async fn publish(&self, namespace: &str, samples: &[MetricSample]) -> Result<(), MetricsError> {
        for sample in samples {
            self.insert(namespace, sample);
        }
        tracing::trace!(namespace, count = samples.len(), "Stored metric samples");
        Ok(())
    }

    async fn aggregate(
        &self,
        query: &AggregateQuery,
    ) -> Result<Vec<AggregatedDatapoint>, MetricsError> {
        let period_ms = query.period_ms();
        if period_ms <= 0 {
            return Err(MetricsError::InvalidQuery("period must be positive".into()));
        }
        if query.end < query.start {
            return Err(MetricsError::InvalidQuery(format!(
                "end {} is before start {}",
                query.end, query.start
            )));
        }

        let key = SeriesKey {
            namespace: query.namespace.clone(),
            metric_name: query.metric_name,
            dimensions: query.dimensions.clone(),
        };

        let Some(points) = self.series.get(&key) else {
            return Ok(Vec::new());
        };

        let mut buckets: BTreeMap<i64, BucketStats> = BTreeMap::new();
        let from = points.partition_point(|(ts, _)| *ts < query.start);
        for &(ts, value) in points[from..].iter().take_while(|(ts, _)| *ts < query.end) {
            buckets
                .entry(bucket_start(ts, period_ms))
                .or_insert_with(BucketStats::new)
                .accumulate(value);
        }

        Ok(buckets
            .into_iter()
            .map(|(timestamp, stats)| AggregatedDatapoint {
                timestamp,
                value: stats.result(query.statistic),
                sample_count: stats.count(),
                statistic: query.statistic,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Statistic;

    const NS: &str = "WebsiteHealth";
    const PERIOD: Duration = Duration::from_secs(300);

    fn sample(metric: MetricName, value: f64, ts: i64) -> MetricSample {
        MetricSample::now(NS, metric, Dimensions::for_url("https://example.com"), value).at(ts)
    }

    fn query(metric: MetricName, start: i64, end: i64) -> AggregateQuery {
        AggregateQuery {
            namespace: NS.to_string(),
            metric_name: metric,
            dimensions: Dimensions::for_url("https://example.com"),
            start,
            end,
            period: PERIOD,
            statistic: Statistic::Average,
        }
    }

    #[tokio::test]
    async fn test_average_per_bucket() {
        let sink = MemoryMetricSink::new();
        let samples = vec![
            sample(MetricName::Availability, 1.0, 10_000),
            sample(MetricName::Availability, 0.0, 20_000),
            sample(MetricName::Availability, 1.0, 310_000),
        ];
        sink.publish(NS, &samples).await.unwrap();

        let points = sink
            .aggregate(&query(MetricName::Availability, 0, 600_000))
            .await
            .unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 0);
        assert_eq!(points[0].value, 0.5);
        assert_eq!(points[0].sample_count, 2);
        assert_eq!(points[1].timestamp, 300_000);
        assert_eq!(points[1].value, 1.0);
    }

    #[tokio::test]
    async fn test_empty_buckets_are_omitted() {
        let sink = MemoryMetricSink::new();
        sink.publish(NS, &[sample(MetricName::Latency, 120.0, 10_000)])
            .await
            .unwrap();

        let points = sink
            .aggregate(&query(MetricName::Latency, 300_000, 600_000))
            .await
            .unwrap();
        assert!(points.is_empty());

        let unknown = sink
            .aggregate(&query(MetricName::Availability, 0, 600_000))
            .await
            .unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn test_series_are_keyed_by_dimensions() {
        let sink = MemoryMetricSink::new();
        let other = MetricSample::now(
            NS,
            MetricName::Latency,
            Dimensions::for_url("https://other.example"),
            900.0,
        )
        .at(1_000);
        sink.publish(NS, &[sample(MetricName::Latency, 100.0, 1_000), other])
            .await
            .unwrap();

        assert_eq!(sink.series_count(), 2);
        let points = sink
            .aggregate(&query(MetricName::Latency, 0, 300_000))
            .await
            .unwrap();
        assert_eq!(points[0].value, 100.0);
    }

    #[tokio::test]
    async fn test_retention_drops_old_points() {
        let sink = MemoryMetricSink::with_retention(Duration::from_secs(60));
        sink.publish(NS, &[sample(MetricName::Latency, 1.0, 0)])
            .await
            .unwrap();
        sink.publish(NS, &[sample(MetricName::Latency, 2.0, 120_000)])
            .await
            .unwrap();

        let points = sink.points(
            NS,
            MetricName::Latency,
            &Dimensions::for_url("https://example.com"),
        );
        assert_eq!(points, vec![(120_000, 2.0)]);
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let sink = MemoryMetricSink::new();
        let result = sink.aggregate(&query(MetricName::Latency, 10, 0)).await;
        assert!(matches!(result, Err(MetricsError::InvalidQuery(_))));
    }
}
