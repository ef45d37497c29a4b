//! HTTP endpoint handlers.
//!
//! Handlers are a thin layer over [`styxy::Daemon`]: they shape wire
//! bodies, map the library error taxonomy onto statuses, and push the
//! potentially slow paths (probing, config locking) onto blocking tasks
//! so the server stays responsive.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use styxy::{AllocationRequest, InstanceRegistration, LockId, Port};

use crate::server::AppState;

/// Library error wrapped for the wire.
#[derive(Debug)]
pub struct ApiError(styxy::Error);

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self(styxy::Error::internal(message))
    }
}

impl From<styxy::Error> for ApiError {
    fn from(err: styxy::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            "invalidRequest" => StatusCode::BAD_REQUEST,
            "unknownServiceType" | "lockNotFound" => StatusCode::NOT_FOUND,
            "noPortsAvailable" | "noRangeAvailable" => StatusCode::CONFLICT,
            "configLockTimeout" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({
            "success": false,
            "error": self.0.to_string(),
            "errorKind": self.0.kind(),
        });
        if let Some(hint) = self.0.remediation() {
            body["hint"] = json!(hint);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn on_blocking<T, F>(task: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> styxy::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|_| ApiError::internal("worker task aborted"))?
        .map_err(ApiError::from)
}

fn parse_port(value: u16) -> ApiResult<Port> {
    Port::try_from(value).map_err(|e| ApiError(styxy::Error::invalid_request(e.to_string())))
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// `POST /allocate` body.
#[derive(Debug, Deserialize)]
pub struct AllocateBody {
    service_type: String,
    #[serde(default)]
    service_name: Option<String>,
    instance_id: String,
    #[serde(default)]
    preferred_port: Option<u16>,
    #[serde(default)]
    project_path: Option<String>,
    #[serde(default)]
    process_id: Option<i32>,
    #[serde(default)]
    dry_run: Option<bool>,
}

/// `POST /allocate` reply.
#[derive(Debug, Serialize)]
pub struct AllocateResponse {
    success: bool,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_id: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    existing: bool,
    #[serde(skip_serializing_if = "is_false")]
    auto_allocated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// `POST /allocate`
pub async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AllocateBody>,
) -> ApiResult<Json<AllocateResponse>> {
    let preferred = match body.preferred_port {
        Some(value) => Some(parse_port(value)?),
        None => None,
    };
    let request = AllocationRequest::new(body.service_type, body.instance_id)
        .with_service_name(body.service_name)
        .with_preferred_port(preferred)
        .with_project_path(body.project_path)
        .with_process_id(body.process_id)
        .with_dry_run(body.dry_run.unwrap_or(false));

    let daemon = Arc::clone(&state.daemon);
    let outcome = on_blocking(move || daemon.allocate(&request)).await?;

    let message = if outcome.lock_id.is_none() {
        Some("dry run: no reservation was made".to_string())
    } else if outcome.existing {
        Some("existing singleton allocation returned".to_string())
    } else {
        None
    };
    Ok(Json(AllocateResponse {
        success: true,
        port: outcome.port.value(),
        lock_id: outcome.lock_id.map(|id| id.to_string()),
        existing: outcome.existing,
        auto_allocated: outcome.auto_allocated,
        message,
    }))
}

/// `DELETE /allocate/{lock_id}`
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(lock_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let lock_id: LockId = lock_id.parse().map_err(ApiError::from)?;
    let daemon = Arc::clone(&state.daemon);
    let released = on_blocking(move || daemon.release(&lock_id)).await?;
    Ok(Json(json!({
        "success": true,
        "port": released.port.value(),
    })))
}

/// `GET /check/{port}`
pub async fn check(
    State(state): State<Arc<AppState>>,
    Path(port): Path<u16>,
) -> ApiResult<Json<styxy::PortCheck>> {
    let port = parse_port(port)?;
    let daemon = Arc::clone(&state.daemon);
    let report = on_blocking(move || Ok(daemon.check(port))).await?;
    Ok(Json(report))
}

/// `GET /scan` query.
#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    start: u16,
    end: u16,
}

/// `GET /scan?start&end`
pub async fn scan(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<Json<Vec<styxy::PortCheck>>> {
    let start = parse_port(query.start)?;
    let end = parse_port(query.end)?;
    let daemon = Arc::clone(&state.daemon);
    let reports = on_blocking(move || daemon.scan(start, end)).await?;
    Ok(Json(reports))
}

/// `GET /allocations`
pub async fn list_allocations(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(json!({ "allocations": state.daemon.list_allocations() }))
}

/// `GET /instance/list`
pub async fn list_instances(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "instances": state.daemon.list_instances() }))
}

/// `POST /instance/register` body.
#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    pid: Option<i32>,
    #[serde(default)]
    working_directory: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// `POST /instance/register`
pub async fn register_instance(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let instance = state.daemon.register_instance(InstanceRegistration {
        instance_id: body.instance_id,
        pid: body.pid,
        working_directory: body.working_directory,
        metadata: body.metadata,
    })?;
    Ok(Json(json!({ "success": true, "instance": instance })))
}

/// `PUT /instance/{id}/heartbeat`
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let at = state.daemon.heartbeat(&instance_id)?;
    Ok(Json(json!({
        "success": true,
        "instance_id": instance_id,
        "last_heartbeat_at": at.to_rfc3339(),
    })))
}

/// `GET /observe/{port}`
pub async fn observe(
    State(state): State<Arc<AppState>>,
    Path(port): Path<u16>,
) -> ApiResult<Json<serde_json::Value>> {
    let port = parse_port(port)?;
    Ok(Json(json!({
        "port": port.value(),
        "observation": state.daemon.observation(port),
    })))
}

/// `GET /observe/all`
pub async fn observe_all(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "observations": state.daemon.observations() }))
}

/// `GET /suggest/{service_type}` query.
#[derive(Debug, Deserialize)]
pub struct SuggestQuery {
    #[serde(default)]
    count: Option<usize>,
}

/// `GET /suggest/{serviceType}?count`
pub async fn suggest(
    State(state): State<Arc<AppState>>,
    Path(service_type): Path<String>,
    Query(query): Query<SuggestQuery>,
) -> ApiResult<Json<styxy::Suggestions>> {
    let count = query.count.unwrap_or(3).min(32);
    let daemon = Arc::clone(&state.daemon);
    let suggestions = on_blocking(move || Ok(daemon.suggest(&service_type, count))).await?;
    Ok(Json(suggestions))
}

/// `GET /observation-stats`
pub async fn observation_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!(state.daemon.observation_stats()))
}

/// `POST /cleanup` body.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupBody {
    #[serde(default)]
    force: Option<bool>,
}

/// `POST /cleanup`
pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CleanupBody>>,
) -> ApiResult<Json<serde_json::Value>> {
    let force = body.and_then(|Json(b)| b.force).unwrap_or(false);
    let daemon = Arc::clone(&state.daemon);
    let report = on_blocking(move || Ok(daemon.run_health_sweep(force))).await?;
    Ok(Json(json!({
        "success": true,
        "checked": report.checked,
        "released": report.released,
        "instances_expired": report.instances_expired,
    })))
}

/// `GET /status`
pub async fn status(State(state): State<Arc<AppState>>) -> Json<styxy::daemon::DaemonStatus> {
    Json(state.daemon.status())
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = state.daemon.status();
    Json(json!({
        "status": "ok",
        "version": status.version,
        "uptime_seconds": status.uptime_seconds,
    }))
}

/// `GET /config`
pub async fn config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.daemon.config_view())
}
