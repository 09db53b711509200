//! Metric sink backed by a remote time-series database over HTTP
//!
//! Samples are written with `POST /ingest` (one row per sample, the namespace
//! is the table) and read back with a `TIME_BUCKET` query on `POST /query`.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use super::model::{AggregateQuery, AggregatedDatapoint, MetricSample};
use super::{MetricSink, MetricsError};

#[derive(Debug, Clone)]
pub struct HttpMetricSink {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[allow(dead_code)]
    columns: Vec<String>,
    rows: Vec<Vec<serde_json::Value>>,
}

impl HttpMetricSink {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MetricsError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetricsError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sample_row(sample: &MetricSample) -> serde_json::Value {
        let dimensions: serde_json::Map<String, serde_json::Value> = sample
            .dimensions
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();

        serde_json::json!({
            "timestamp": sample.timestamp,
            "metric": sample.metric_name.as_str(),
            "value": sample.value,
            "unit": sample.unit.to_string(),
            "dimensions": dimensions,
        })
    }

    /// Build the bucketed aggregate SQL for one series
    pub(crate) fn aggregate_sql(query: &AggregateQuery) -> Result<String, MetricsError> {
        check_identifier("namespace", &query.namespace)?;
        for (name, _) in query.dimensions.iter() {
            check_identifier("dimension name", name)?;
        }

        let bucket = format!("TIME_BUCKET('{} seconds', timestamp)", query.period.as_secs());
        let mut sql = format!(
            "SELECT {bucket}, {}(value), COUNT(*) FROM {} WHERE metric = '{}'",
            query.statistic.sql_function(),
            query.namespace,
            query.metric_name.as_str(),
        );
        for (name, value) in query.dimensions.iter() {
            sql.push_str(&format!(
                " AND dimensions.{} = '{}'",
                name,
                value.replace('\'', "''")
            ));
        }
        sql.push_str(&format!(
            " AND timestamp >= {} AND timestamp < {} GROUP BY {bucket}",
            query.start, query.end
        ));
        Ok(sql)
    }

    fn parse_row(
        row: &[serde_json::Value],
        query: &AggregateQuery,
    ) -> Result<Option<AggregatedDatapoint>, MetricsError> {
        let [bucket, value, count] = row else {
            return Err(MetricsError::Deserialization(format!(
                "expected 3 columns, got {}",
                row.len()
            )));
        };

        let timestamp = bucket
            .as_i64()
            .or_else(|| bucket.as_f64().map(|f| f as i64))
            .ok_or_else(|| MetricsError::Deserialization(format!("bad bucket {}", bucket)))?;
        let sample_count = count.as_u64().unwrap_or(0);
        if sample_count == 0 {
            return Ok(None);
        }
        let Some(value) = value.as_f64() else {
            return Ok(None);
        };

        Ok(Some(AggregatedDatapoint {
            timestamp,
            value,
            sample_count,
            statistic: query.statistic,
        }))
    }
}

/// Table and column names are spliced into SQL unquoted
fn check_identifier(kind: &str, name: &str) -> Result<(), MetricsError> {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let re = IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

    if re.is_match(name) {
        Ok(())
    } else {
        Err(MetricsError::InvalidQuery(format!("invalid {} '{}'", kind, name)))
    }
}

#[async_trait]
impl MetricSink for HttpMetricSink {
    async fn publish(&self, namespace: &str, samples: &[MetricSample]) -> Result<(), MetricsError> {
        let url = format!("{}/ingest", self.base_url);
        let request = serde_json::json!({
            "table": namespace,
            "rows": samples.iter().map(Self::sample_row).collect::<Vec<_>>(),
        });

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MetricsError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MetricsError::Remote(error_text));
        }

        Ok(())
    }

    async fn aggregate(
        &self,
        query: &AggregateQuery,
    ) -> Result<Vec<AggregatedDatapoint>, MetricsError> {
        if query.period.as_secs() == 0 {
            return Err(MetricsError::InvalidQuery(
                "period must be at least one second".into(),
            ));
        }

        let url = format!("{}/query", self.base_url);
        let request = serde_json::json!({ "sql": Self::aggregate_sql(query)? });

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MetricsError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MetricsError::Remote(error_text));
        }

        let result: QueryResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::Deserialization(e.to_string()))?;

        let mut points = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            if let Some(point) = Self::parse_row(row, query)? {
                points.push(point);
            }
        }
        points.sort_by_key(|p| p.timestamp);

        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Dimensions, MetricName, Statistic};
    use axum::{routing::post, Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn query() -> AggregateQuery {
        AggregateQuery {
            namespace: "WebsiteHealth".to_string(),
            metric_name: MetricName::Availability,
            dimensions: Dimensions::for_url("https://example.com/o'neil"),
            start: 0,
            end: 600_000,
            period: Duration::from_secs(300),
            statistic: Statistic::Average,
        }
    }

    async fn spawn_remote(ingested: Arc<Mutex<Vec<serde_json::Value>>>) -> String {
        let app = Router::new()
            .route(
                "/ingest",
                post(move |Json(body): Json<serde_json::Value>| {
                    let ingested = Arc::clone(&ingested);
                    async move {
                        ingested.lock().push(body);
                        Json(serde_json::json!({ "inserted": 2, "errors": 0 }))
                    }
                }),
            )
            .route(
                "/query",
                post(|| async {
                    Json(serde_json::json!({
                        "columns": ["time_bucket", "avg", "count"],
                        "rows": [[300000, 1.0, 3], [0, 0.5, 2], [600000, null, 0]],
                    }))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_aggregate_sql_escapes_values() {
        let sql = HttpMetricSink::aggregate_sql(&query()).unwrap();
        assert!(sql.starts_with("SELECT TIME_BUCKET('300 seconds', timestamp), AVG(value)"));
        assert!(sql.contains("FROM WebsiteHealth"));
        assert!(sql.contains("dimensions.URL = 'https://example.com/o''neil'"));
        assert!(sql.contains("timestamp >= 0 AND timestamp < 600000"));
    }

    #[test]
    fn test_aggregate_sql_rejects_bad_identifiers() {
        let mut bad_namespace = query();
        bad_namespace.namespace = "WebsiteHealth; DROP TABLE x".to_string();
        assert!(matches!(
            HttpMetricSink::aggregate_sql(&bad_namespace),
            Err(MetricsError::InvalidQuery(_))
        ));

        let mut bad_dimension = query();
        bad_dimension.dimensions = Dimensions::new().with("URL = '' OR 1=1 --", "x");
        assert!(matches!(
            HttpMetricSink::aggregate_sql(&bad_dimension),
            Err(MetricsError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_aggregate_with_bad_identifier_never_reaches_backend() {
        let sink = HttpMetricSink::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let mut bad = query();
        bad.namespace = "a.b".to_string();
        let result = sink.aggregate(&bad).await;
        assert!(matches!(result, Err(MetricsError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_publish_and_aggregate_roundtrip_over_http() {
        let ingested = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_remote(Arc::clone(&ingested)).await;
        let sink = HttpMetricSink::new(format!("{}/", base), Duration::from_secs(5)).unwrap();
        assert_eq!(sink.base_url(), base);

        let sample = MetricSample::now(
            "WebsiteHealth",
            MetricName::Latency,
            Dimensions::for_url("https://example.com"),
            120.0,
        );
        sink.publish("WebsiteHealth", &[sample]).await.unwrap();

        let body = ingested.lock()[0].clone();
        assert_eq!(body["table"], "WebsiteHealth");
        assert_eq!(body["rows"][0]["metric"], "Latency");
        assert_eq!(body["rows"][0]["unit"], "Milliseconds");
        assert_eq!(body["rows"][0]["dimensions"]["URL"], "https://example.com");

        let points = sink.aggregate(&query()).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 0);
        assert_eq!(points[0].value, 0.5);
        assert_eq!(points[1].sample_count, 3);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let sink = HttpMetricSink::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let result = sink.aggregate(&query()).await;
        assert!(matches!(result, Err(MetricsError::Unavailable(_))));
    }
}
