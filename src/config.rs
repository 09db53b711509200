use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alarms::config::{DEFAULT_LATENCY_THRESHOLD_MS, DEFAULT_PERIOD};
use crate::alarms::AlarmRules;
use crate::prober::ProbeConfig;

/// Runtime configuration for the canary service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryConfig {
    pub host: String,
    pub port: u16,
    /// Probe targets, loaded once at startup
    pub targets: Vec<String>,
    pub namespace: String,
    pub alert_email: Option<String>,
    pub webhook_url: Option<String>,
    pub latency_threshold_ms: f64,
    pub evaluation_period_secs: u64,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub cycle_budget_secs: u64,
    pub probe_concurrency: usize,
    /// Remote time-series endpoint; the in-memory sink is used when unset
    pub metrics_url: Option<String>,
    /// JSON-lines alarm log; the in-memory store is used when unset
    pub record_log: Option<PathBuf>,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            targets: Vec::new(),
            namespace: "WebsiteHealth".to_string(),
            alert_email: None,
            webhook_url: None,
            latency_threshold_ms: DEFAULT_LATENCY_THRESHOLD_MS,
            evaluation_period_secs: DEFAULT_PERIOD.as_secs(),
            probe_interval_secs: 300,
            probe_timeout_secs: 10,
            cycle_budget_secs: 30,
            probe_concurrency: 1,
            metrics_url: None,
            record_log: None,
        }
    }
}

impl CanaryConfig {
    /// Create a config from environment variables
    /// CANARY_HOST=0.0.0.0
    /// CANARY_PORT=8080
    /// CANARY_TARGETS_FILE=targets.json
    /// CANARY_TARGETS=https://example.com,https://example.org
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let mut targets = match get("CANARY_TARGETS_FILE") {
            Some(path) => load_targets_file(path)?,
            None => Vec::new(),
        };
        if let Some(list) = get("CANARY_TARGETS") {
            targets.extend(list.split(',').map(str::to_string));
        }

        let config = Self {
            host: get("CANARY_HOST").unwrap_or(defaults.host),
            port: parse(&get, "CANARY_PORT", defaults.port)?,
            targets: dedupe_targets(targets),
            namespace: get("CANARY_NAMESPACE").unwrap_or(defaults.namespace),
            alert_email: get("CANARY_ALERT_EMAIL"),
            webhook_url: get("CANARY_WEBHOOK_URL"),
            latency_threshold_ms: parse(
                &get,
                "CANARY_LATENCY_THRESHOLD_MS",
                defaults.latency_threshold_ms,
            )?,
            evaluation_period_secs: parse(
                &get,
                "CANARY_EVALUATION_PERIOD_SECS",
                defaults.evaluation_period_secs,
            )?,
            probe_interval_secs: parse(
                &get,
                "CANARY_PROBE_INTERVAL_SECS",
                defaults.probe_interval_secs,
            )?,
            probe_timeout_secs: parse(
                &get,
                "CANARY_PROBE_TIMEOUT_SECS",
                defaults.probe_timeout_secs,
            )?,
            cycle_budget_secs: parse(
                &get,
                "CANARY_CYCLE_BUDGET_SECS",
                defaults.cycle_budget_secs,
            )?,
            probe_concurrency: parse(
                &get,
                "CANARY_PROBE_CONCURRENCY",
                defaults.probe_concurrency,
            )?,
            metrics_url: get("CANARY_METRICS_URL"),
            record_log: get("CANARY_RECORD_LOG").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "evaluation period must be positive".to_string(),
            ));
        }
        if self.probe_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "probe interval must be positive".to_string(),
            ));
        }
        if self.probe_interval_secs > self.evaluation_period_secs {
            return Err(ConfigError::Invalid(format!(
                "probe interval ({}s) must not exceed the evaluation period ({}s)",
                self.probe_interval_secs, self.evaluation_period_secs
            )));
        }
        if self.probe_timeout_secs >= self.cycle_budget_secs {
            return Err(ConfigError::Invalid(format!(
                "probe timeout ({}s) must be shorter than the cycle budget ({}s)",
                self.probe_timeout_secs, self.cycle_budget_secs
            )));
        }
        if self.probe_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "probe concurrency must be at least 1".to_string(),
            ));
        }
        if !(self.latency_threshold_ms.is_finite() && self.latency_threshold_ms > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "latency threshold must be positive, got {}",
                self.latency_threshold_ms
            )));
        }
        Ok(())
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            namespace: self.namespace.clone(),
            ..ProbeConfig::default()
        }
        .with_timeout(Duration::from_secs(self.probe_timeout_secs))
        .with_cycle_budget(Duration::from_secs(self.cycle_budget_secs))
        .with_concurrency(self.probe_concurrency)
    }

    pub fn alarm_rules(&self) -> AlarmRules {
        AlarmRules::new(
            self.latency_threshold_ms,
            Duration::from_secs(self.evaluation_period_secs),
        )
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn evaluation_period(&self) -> Duration {
        Duration::from_secs(self.evaluation_period_secs)
    }
}

fn parse<F, T>(get: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Read a JSON array of URL strings
pub fn load_targets_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::TargetsFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str::<Vec<String>>(&contents).map_err(|e| ConfigError::TargetsFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Trim, drop blanks and repeats, keep first-seen order
pub fn dedupe_targets<I>(targets: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    targets
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load targets from {path}: {reason}")]
    TargetsFile { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
