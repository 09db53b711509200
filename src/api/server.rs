use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    aggregate_metrics, alarm_log, health_check, list_alarms, probe_status, receive_notifications,
    run_probes, AppState,
};
use crate::alarms::{
    AlarmEvaluator, EmailSubscriber, LogSubscriber, Notifier, WebhookSubscriber,
};
use crate::config::CanaryConfig;
use crate::logger::{
    AlarmLogger, AlarmLoggerSubscriber, FileRecordStore, MemoryRecordStore, RecordStore,
};
use crate::metrics::{HttpMetricSink, MemoryMetricSink, MetricSink};
use crate::prober::{ProbeWorker, Prober};

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Probes
        .route("/probes", get(probe_status))
        .route("/probes/run", post(run_probes))
        // Alarms
        .route("/alarms", get(list_alarms))
        .route("/alarms/:name/log", get(alarm_log))
        // Notification delivery into the alarm log
        .route("/notifications", post(receive_notifications))
        // Metrics
        .route("/metrics/aggregate", post(aggregate_metrics))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Wire sink, prober, alarms and logger together for the configured targets.
///
/// Background workers are not started here.
pub fn assemble(
    config: CanaryConfig,
    sink: Arc<dyn MetricSink>,
    store: Arc<dyn RecordStore>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    config.validate()?;

    let logger = Arc::new(AlarmLogger::new(store));

    let notifier = Arc::new(Notifier::new());
    notifier.subscribe_all(Arc::new(LogSubscriber));
    notifier.subscribe_all(Arc::new(AlarmLoggerSubscriber::new(Arc::clone(&logger))));
    if let Some(ref email) = config.alert_email {
        notifier.subscribe_all(Arc::new(EmailSubscriber::new(email.clone())));
    }
    if let Some(ref url) = config.webhook_url {
        notifier.subscribe_all(Arc::new(WebhookSubscriber::new(url.clone())));
    }

    let evaluator = Arc::new(AlarmEvaluator::new(
        config.namespace.clone(),
        config.alarm_rules(),
        Arc::clone(&sink),
        notifier,
    )?);
    for target in &config.targets {
        evaluator.register_target(target)?;
    }

    let prober = Arc::new(Prober::new(config.probe_config(), Arc::clone(&sink))?);
    let probe_worker = Arc::new(ProbeWorker::new(
        prober,
        Arc::new(config.targets.clone()),
        config.probe_interval(),
    ));

    Ok(AppState {
        config,
        sink,
        probe_worker,
        evaluator,
        logger,
    })
}

/// Run the HTTP server
pub async fn run_server(config: CanaryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let sink: Arc<dyn MetricSink> = match config.metrics_url {
        Some(ref url) => {
            tracing::info!("Publishing metrics to {}", url);
            Arc::new(HttpMetricSink::new(
                url.clone(),
                Duration::from_secs(config.probe_timeout_secs),
            )?)
        }
        None => {
            tracing::info!("Using in-memory metric sink");
            Arc::new(MemoryMetricSink::new())
        }
    };

    let store: Arc<dyn RecordStore> = match config.record_log {
        Some(ref path) => Arc::new(FileRecordStore::open(path).await?),
        None => {
            tracing::info!("Using in-memory alarm log");
            Arc::new(MemoryRecordStore::new())
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let evaluation_period = config.evaluation_period();
    let state = Arc::new(assemble(config, sink, store)?);

    // Start background workers
    let probe_worker = Arc::clone(&state.probe_worker);
    let probe_handle = Arc::clone(&probe_worker).start();
    let evaluator = Arc::clone(&state.evaluator);
    let evaluator_handle = Arc::clone(&evaluator).start(evaluation_period);

    let app = build_router(state);

    tracing::info!("Starting canary server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(probe_worker, evaluator))
        .await?;

    probe_handle.abort();
    evaluator_handle.abort();

    tracing::info!("Canary server stopped");
    Ok(())
}

async fn shutdown_signal(probe_worker: Arc<ProbeWorker>, evaluator: Arc<AlarmEvaluator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    probe_worker.stop();
    evaluator.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::{AlarmKind, AlarmState};
    use crate::logger::{AlarmLogRecord, StoreError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    const DOWN: &str = "http://127.0.0.1:1/down";

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn put(&self, _: &AlarmLogRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("table offline".into()))
        }

        async fn query(&self, _: &str, _: usize) -> Result<Vec<AlarmLogRecord>, StoreError> {
            Ok(Vec::new())
        }

        fn len(&self) -> usize {
            0
        }
    }

    fn create_test_app_with(store: Arc<dyn RecordStore>) -> Router {
        let config = CanaryConfig {
            targets: vec![DOWN.to_string()],
            ..CanaryConfig::default()
        };
        let state = assemble(config, Arc::new(MemoryMetricSink::new()), store).unwrap();
        build_router(Arc::new(state))
    }

    fn create_test_app() -> Router {
        create_test_app_with(Arc::new(MemoryRecordStore::new()))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    fn envelope(alarm: &str) -> Value {
        let message = json!({
            "AlarmName": alarm,
            "NewStateValue": "ALARM",
            "NewStateReason": "Threshold Crossed",
            "Trigger": {
                "MetricName": "Availability",
                "Namespace": "WebsiteHealth",
                "Dimensions": [{ "name": "URL", "value": DOWN }],
            },
        });
        json!({ "Records": [{ "Sns": { "Message": message.to_string() } }] })
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["targets"], 1);
        assert_eq!(body["alarms"], 2);
    }

    #[tokio::test]
    async fn test_list_alarms() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/alarms")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let alarms = body["alarms"].as_array().unwrap();
        assert_eq!(alarms.len(), 2);
        assert!(alarms.iter().all(|a| a["state"] == "INSUFFICIENT_DATA"));
        assert!(alarms.iter().all(|a| a["target"] == DOWN));
    }

    #[tokio::test]
    async fn test_run_probes_then_status() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/probes/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["results"][0]["url"], DOWN);
        assert_eq!(report["results"][0]["status"], 0);
        assert_eq!(report["results"][0]["latency_ms"], 0.0);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = body_json(response).await;
        assert_eq!(status["targets"][0], DOWN);
        assert!(status["last_cycle"].is_object());
    }

    #[tokio::test]
    async fn test_notifications_are_logged() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(post_json("/notifications", &envelope("AvailAlarmhttp1270011down")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["statusCode"], 200);
        assert_eq!(body["logged"], 1);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/alarms/AvailAlarmhttp1270011down/log?limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["NewStateValue"], "ALARM");
        assert_eq!(records[0]["URL"], DOWN);
    }

    #[tokio::test]
    async fn test_notification_storage_failure_requests_redelivery() {
        let app = create_test_app_with(Arc::new(BrokenStore));

        let response = app
            .oneshot(post_json("/notifications", &envelope("AvailAlarmhttp1270011down")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["statusCode"], 500);
    }

    #[tokio::test]
    async fn test_unknown_alarm_log() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/alarms/NoSuchAlarm/log")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_aggregate_rejects_bad_window() {
        let app = create_test_app();
        let query = json!({
            "namespace": "WebsiteHealth",
            "metric_name": "Availability",
            "dimensions": { "URL": DOWN },
            "start": 2_000,
            "end": 1_000,
            "period": 300,
        });

        let response = app
            .oneshot(post_json("/metrics/aggregate", &query))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    async fn spawn_site() -> String {
        let site = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route(
                "/hang",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, site).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_probe_to_alarm_log_pipeline() {
        let base = spawn_site().await;
        let healthy = format!("{}/ok", base);
        let hung = format!("{}/hang", base);
        let config = CanaryConfig {
            targets: vec![healthy.clone(), hung.clone()],
            probe_timeout_secs: 1,
            cycle_budget_secs: 2,
            ..CanaryConfig::default()
        };
        let store = Arc::new(MemoryRecordStore::new());
        let state = assemble(config, Arc::new(MemoryMetricSink::new()), store.clone()).unwrap();
        let period = chrono::Duration::seconds(300);

        for _ in 0..3 {
            let report = state.probe_worker.run_once().await;
            assert_eq!(report.available(), 1);
            let events = state.evaluator.tick(chrono::Utc::now() + period).await;
            assert_eq!(events.len(), 4);
        }

        let healthy_alarm = crate::alarms::alarm_name(AlarmKind::Availability, &healthy);
        let records = store.query(&healthy_alarm, 10).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.new_state == "OK"));
        assert!(records.iter().all(|r| r.url.as_deref() == Some(healthy.as_str())));

        let hung_alarm = crate::alarms::alarm_name(AlarmKind::Availability, &hung);
        let records = store.query(&hung_alarm, 10).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.new_state == "ALARM"));
        assert_eq!(records[0].metric_name, "Availability");

        // Failed probes report zero latency, which never breaches
        assert_eq!(
            state.evaluator.state_of(&hung, AlarmKind::Latency),
            Some(AlarmState::Ok)
        );
        assert_eq!(store.len(), 12);
    }

    #[test]
    fn test_assemble_rejects_colliding_targets() {
        let config = CanaryConfig {
            targets: vec!["https://a.example/x".to_string(), "https://a.example/x/".to_string()],
            ..CanaryConfig::default()
        };
        let result = assemble(
            config,
            Arc::new(MemoryMetricSink::new()),
            Arc::new(MemoryRecordStore::new()),
        );
        assert!(result.is_err());
    }
}
