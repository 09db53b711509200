//! HTTP prober: one GET per target, two samples per probe

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::{Dimensions, MetricName, MetricSample, MetricSink};

/// Prober configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Metric namespace samples are published under
    pub namespace: String,
    /// Per-probe timeout
    pub timeout: Duration,
    /// Deadline shared by every probe in one cycle
    pub cycle_budget: Duration,
    /// Maximum probes in flight; 1 probes sequentially
    pub concurrency: usize,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            namespace: "WebsiteHealth".to_string(),
            timeout: Duration::from_secs(10),
            cycle_budget: Duration::from_secs(30),
            concurrency: 1,
            user_agent: "Canary/1.0".to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cycle_budget(mut self, budget: Duration) -> Self {
        self.cycle_budget = budget;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.timeout >= self.cycle_budget {
            return Err(ProbeError::InvalidConfig(format!(
                "probe timeout {:?} must be shorter than the cycle budget {:?}",
                self.timeout, self.cycle_budget
            )));
        }
        if self.concurrency == 0 {
            return Err(ProbeError::InvalidConfig(
                "probe concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Result of probing one target
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// 1 when the target answered 200, else 0
    pub availability: u8,
    /// Time to response headers; 0 when no usable response arrived
    pub latency_ms: f64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    fn failed(status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            availability: 0,
            latency_ms: 0.0,
            status_code,
            error: Some(error.into()),
        }
    }
}

/// Per-target line of a cycle summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub url: String,
    pub status: u8,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one probing cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub results: Vec<ProbeResult>,
    pub publish_failures: usize,
}

impl CycleReport {
    pub fn available(&self) -> usize {
        self.results.iter().filter(|r| r.status == 1).count()
    }
}

pub struct Prober {
    client: reqwest::Client,
    sink: Arc<dyn MetricSink>,
    config: ProbeConfig,
}

impl Prober {
    pub fn new(config: ProbeConfig, sink: Arc<dyn MetricSink>) -> Result<Self, ProbeError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            sink,
            config,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe a single target. Never fails: every error maps to availability 0.
    pub async fn probe(&self, target: &str) -> ProbeOutcome {
        let start = Instant::now();

        match self.client.get(target).send().await {
            Ok(response) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                let status = response.status();

                if status.is_client_error() || status.is_server_error() {
                    return ProbeOutcome::failed(Some(status.as_u16()), format!("HTTP {}", status));
                }

                ProbeOutcome {
                    availability: u8::from(status == reqwest::StatusCode::OK),
                    latency_ms,
                    status_code: Some(status.as_u16()),
                    error: None,
                }
            }
            Err(e) => ProbeOutcome::failed(None, e.to_string()),
        }
    }

    /// Probe every target and publish both samples for each.
    ///
    /// Results come back in target order. A failing target never stops the others.
    pub async fn run_cycle(&self, targets: &[String]) -> CycleReport {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.cycle_budget;

        let outcomes: Vec<(ProbeResult, bool)> = stream::iter(targets.iter().cloned())
            .map(|target| async move { self.probe_and_publish(&target, deadline).await })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        let publish_failures = outcomes.iter().filter(|(_, published)| !published).count();
        let results: Vec<ProbeResult> = outcomes.into_iter().map(|(r, _)| r).collect();

        let report = CycleReport {
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            results,
            publish_failures,
        };

        tracing::info!(
            targets = report.results.len(),
            available = report.available(),
            publish_failures,
            duration_ms = report.duration_ms,
            "Probe cycle finished"
        );
        for result in &report.results {
            tracing::debug!(
                url = %result.url,
                status = result.status,
                latency_ms = result.latency_ms,
                "Probe result"
            );
        }

        report
    }

    async fn probe_and_publish(
        &self,
        target: &str,
        deadline: tokio::time::Instant,
    ) -> (ProbeResult, bool) {
        let outcome = match tokio::time::timeout_at(deadline, self.probe(target)).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::failed(None, "cycle deadline exceeded"),
        };

        if let Some(error) = &outcome.error {
            tracing::warn!(url = %target, error = %error, "Probe failed");
        }

        let published = self.publish(target, &outcome).await;

        let result = ProbeResult {
            url: target.to_string(),
            status: outcome.availability,
            latency_ms: outcome.latency_ms,
            status_code: outcome.status_code,
            error: outcome.error,
        };
        (result, published)
    }

    async fn publish(&self, target: &str, outcome: &ProbeOutcome) -> bool {
        let samples = [
            MetricSample::now(
                &self.config.namespace,
                MetricName::Availability,
                Dimensions::for_url(target),
                f64::from(outcome.availability),
            ),
            MetricSample::now(
                &self.config.namespace,
                MetricName::Latency,
                Dimensions::for_url(target),
                outcome.latency_ms,
            ),
        ];

        match self.sink.publish(&self.config.namespace, &samples).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(url = %target, error = %e, "Failed to publish probe metrics");
                false
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Invalid probe configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}
