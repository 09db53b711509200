use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alarms::{Alarm, AlarmEvaluator, AlarmKind, AlarmState};
use crate::config::CanaryConfig;
use crate::logger::{AlarmLogRecord, AlarmLogger};
use crate::metrics::{AggregateQuery, AggregatedDatapoint, MetricSink, MetricsError};
use crate::prober::{CycleReport, ProbeWorker};

/// Application state shared across handlers
pub struct AppState {
    pub config: CanaryConfig,
    pub sink: Arc<dyn MetricSink>,
    pub probe_worker: Arc<ProbeWorker>,
    pub evaluator: Arc<AlarmEvaluator>,
    pub logger: Arc<AlarmLogger>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub targets: usize,
    pub alarms: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        targets: state.probe_worker.targets().len(),
        alarms: state.evaluator.len(),
    })
}

// ============================================================================
// Probes
// ============================================================================

#[derive(Serialize)]
pub struct ProbesResponse {
    pub namespace: String,
    pub targets: Vec<String>,
    pub last_cycle: Option<CycleReport>,
}

pub async fn probe_status(State(state): State<Arc<AppState>>) -> Json<ProbesResponse> {
    Json(ProbesResponse {
        namespace: state.config.namespace.clone(),
        targets: state.probe_worker.targets().to_vec(),
        last_cycle: state.probe_worker.last_report(),
    })
}

pub async fn run_probes(State(state): State<Arc<AppState>>) -> Json<CycleReport> {
    Json(state.probe_worker.run_once().await)
}

// ============================================================================
// Alarms
// ============================================================================

#[derive(Serialize)]
pub struct AlarmsResponse {
    pub alarms: Vec<AlarmInfo>,
}

#[derive(Serialize)]
pub struct AlarmInfo {
    pub name: String,
    pub target: String,
    pub kind: AlarmKind,
    pub state: AlarmState,
    pub reason: Option<String>,
    pub threshold: f64,
    pub last_evaluated: Option<i64>,
    pub last_transition: Option<i64>,
    pub last_error: Option<String>,
}

impl From<Alarm> for AlarmInfo {
    fn from(alarm: Alarm) -> Self {
        Self {
            kind: alarm.kind(),
            threshold: alarm.rule.threshold,
            name: alarm.name,
            target: alarm.target,
            state: alarm.state,
            reason: alarm.state_reason,
            last_evaluated: alarm.last_evaluated,
            last_transition: alarm.last_transition,
            last_error: alarm.last_error,
        }
    }
}

pub async fn list_alarms(State(state): State<Arc<AppState>>) -> Json<AlarmsResponse> {
    let alarms = state.evaluator.list().into_iter().map(AlarmInfo::from).collect();
    Json(AlarmsResponse { alarms })
}

#[derive(Deserialize)]
pub struct LogParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AlarmLogResponse {
    pub alarm: String,
    pub records: Vec<AlarmLogRecord>,
}

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 1000;

pub async fn alarm_log(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Json<AlarmLogResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    let records = state
        .logger
        .store()
        .query(&name, limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if records.is_empty() && state.evaluator.get(&name).is_none() {
        return Err(ApiError::NotFound(format!("Alarm '{}' not found", name)));
    }

    Ok(Json(AlarmLogResponse {
        alarm: name,
        records,
    }))
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Serialize)]
pub struct NotificationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub logged: usize,
}

/// SNS-style delivery endpoint. A 500 tells the sender to redeliver.
pub async fn receive_notifications(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<serde_json::Value>,
) -> Result<Json<NotificationResponse>, ApiError> {
    let logged = state.logger.on_envelope(&envelope).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to log alarm notification");
        ApiError::Internal(e.to_string())
    })?;

    Ok(Json(NotificationResponse {
        status_code: 200,
        logged,
    }))
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Serialize)]
pub struct AggregateResponse {
    pub datapoints: Vec<AggregatedDatapoint>,
}

pub async fn aggregate_metrics(
    State(state): State<Arc<AppState>>,
    Json(query): Json<AggregateQuery>,
) -> Result<Json<AggregateResponse>, ApiError> {
    let datapoints = state.sink.aggregate(&query).await.map_err(|e| match e {
        MetricsError::InvalidQuery(msg) => ApiError::BadRequest(msg),
        other => ApiError::Upstream(other.to_string()),
    })?;

    Ok(Json(AggregateResponse { datapoints }))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "statusCode": status.as_u16(),
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
