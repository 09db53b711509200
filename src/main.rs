//! Canary Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - CANARY_HOST: Bind address (default: 0.0.0.0)
//! - CANARY_PORT: Port number (default: 8080)
//! - CANARY_TARGETS_FILE: JSON array of URLs to probe
//! - CANARY_TARGETS: Comma-separated URLs, appended to the file's list
//! - CANARY_NAMESPACE: Metric namespace (default: WebsiteHealth)
//! - CANARY_ALERT_EMAIL / CANARY_WEBHOOK_URL: Optional notification destinations
//! - CANARY_LATENCY_THRESHOLD_MS: Latency alarm threshold (default: 1500)
//! - CANARY_EVALUATION_PERIOD_SECS / CANARY_PROBE_INTERVAL_SECS: Schedules (default: 300)
//! - CANARY_PROBE_TIMEOUT_SECS / CANARY_CYCLE_BUDGET_SECS: Probe limits (default: 10 / 30)
//! - CANARY_PROBE_CONCURRENCY: Probes in flight (default: 1)
//! - CANARY_METRICS_URL: Remote time-series endpoint (default: in-memory)
//! - CANARY_RECORD_LOG: Alarm log file (default: in-memory)
//! - RUST_LOG: Log level (default: info)

use canary::api::run_server;
use canary::config::CanaryConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canary=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CanaryConfig::from_env()?;

    tracing::info!("Canary configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Namespace: {}", config.namespace);
    tracing::info!("  Targets: {}", config.targets.len());
    for target in &config.targets {
        tracing::info!("    - {}", target);
    }
    tracing::info!(
        "  Probe every {}s (timeout {}s, cycle budget {}s, concurrency {})",
        config.probe_interval_secs,
        config.probe_timeout_secs,
        config.cycle_budget_secs,
        config.probe_concurrency
    );
    tracing::info!(
        "  Alarms every {}s, latency threshold {} ms",
        config.evaluation_period_secs,
        config.latency_threshold_ms
    );
    if let Some(ref email) = config.alert_email {
        tracing::info!("  Alert email: {}", email);
    }
    if let Some(ref url) = config.webhook_url {
        tracing::info!("  Webhook: {}", url);
    }
    if config.targets.is_empty() {
        tracing::warn!("No targets configured; nothing will be probed");
    }

    println!(
        r#"
   ___
  / __|__ _ _ _  __ _ _ _ _  _
 | (__/ _` | ' \/ _` | '_| || |
  \___\__,_|_||_\__,_|_|  \_, |
                          |__/
 Synthetic Website Monitoring
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
