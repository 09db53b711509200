//! Metric sink: where probe samples go and where alarms read them back
//!
//! Two backends implement [`MetricSink`]: an in-process store used by default
//! and in tests, and an HTTP client for a remote time-series database.

pub mod http;
pub mod memory;
pub mod model;

pub use http::HttpMetricSink;
pub use memory::MemoryMetricSink;
pub use model::{
    AggregateQuery, AggregatedDatapoint, Dimensions, MetricName, MetricSample, Statistic, Unit,
    URL_DIMENSION,
};

use async_trait::async_trait;

/// Time-series store keyed by (namespace, metric, dimensions, timestamp)
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Publish a batch of samples in one call. Best effort.
    async fn publish(&self, namespace: &str, samples: &[MetricSample]) -> Result<(), MetricsError>;

    /// Aggregate one series into period buckets within `[start, end)`.
    ///
    /// Only buckets that received at least one sample are returned, oldest first.
    async fn aggregate(&self, query: &AggregateQuery)
        -> Result<Vec<AggregatedDatapoint>, MetricsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Metric backend unavailable: {0}")]
    Unavailable(String),
}
