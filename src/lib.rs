//! Canary: synthetic website monitoring
//!
//! Probes a fixed list of URLs on a schedule, records availability and latency
//! as metrics, evaluates threshold alarms over those metrics, fans alarm
//! notifications out to subscribers and keeps an audit log of every
//! notification.
//!
//! # Pipeline
//!
//! - **Prober**: one GET per target, two samples (`Availability`, `Latency`) per probe
//! - **Metric Sink**: in-memory or remote time-series store, aggregated per period
//! - **Alarm Evaluator**: OK / ALARM / INSUFFICIENT_DATA per (target, metric)
//! - **Notifier**: per-kind topics with log, email, webhook and logger subscribers
//! - **Alarm Logger**: one record per delivered notification, at-least-once
//!
//! # Example
//!
//! ```no_run
//! use canary::metrics::MemoryMetricSink;
//! use canary::prober::{ProbeConfig, Prober};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = Arc::new(MemoryMetricSink::new());
//! let prober = Prober::new(ProbeConfig::default(), sink)?;
//!
//! let report = prober.run_cycle(&["https://example.com".to_string()]).await;
//! println!("{}/{} targets up", report.available(), report.results.len());
//! # Ok(())
//! # }
//! ```

pub mod alarms;
pub mod api;
pub mod config;
pub mod logger;
pub mod metrics;
pub mod prober;

// Re-export commonly used types
pub use alarms::{AlarmEvaluator, AlarmEvent, AlarmState, Notifier};
pub use config::{CanaryConfig, ConfigError};
pub use logger::{AlarmLogRecord, AlarmLogger, RecordStore};
pub use metrics::{MetricSample, MetricSink, MetricsError};
pub use prober::{CycleReport, Prober};
