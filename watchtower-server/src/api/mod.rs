//! REST control API.
//!
//! Every mutating operation carries the requesting operator id; authorization
//! is enforced by the scheduler (watches) or by ownership (user roster).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use watchtower_core::{ProbeReport, ProfileLookup, SessionRecord, StoreSummary};
use watchtower_types::error::MonitorError;
use watchtower_types::models::{
    EndpointStatsSnapshot, MonitorStatsSnapshot, Verdict, WatchKind, WatchSummary,
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Status
        .route("/status", get(get_status))
        // One-shot lookup
        .route("/profile/:handle", get(lookup_profile))
        // Watches
        .route("/watches", get(list_watches).post(start_watch))
        .route("/watches/:handle/stop", post(stop_watch))
        // Stats
        .route("/stats", get(get_stats))
        .route("/sessions", get(list_sessions))
        // Mirror endpoints
        .route("/endpoints", get(list_endpoints))
        .route("/endpoints/add", post(add_endpoint))
        .route("/endpoints/remove", post(remove_endpoint))
        .route("/endpoints/test", post(test_endpoint))
        // Outbound proxies
        .route("/proxies", get(list_proxies))
        .route("/proxies/add", post(add_proxy))
        .route("/proxies/remove", post(remove_proxy))
        // Authorized operators
        .route("/users", get(list_users))
        .route("/users/add", post(add_user))
        .route("/users/remove", post(remove_user))
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn err(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.to_string() })))
}

fn monitor_err(e: MonitorError) -> ApiError {
    let status = match e {
        MonitorError::AlreadyWatching { .. } => StatusCode::CONFLICT,
        MonitorError::NotWatching { .. } => StatusCode::NOT_FOUND,
        MonitorError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        MonitorError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        MonitorError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    err(status, e)
}

fn store_err(e: impl std::fmt::Display) -> ApiError {
    err(StatusCode::INTERNAL_SERVER_ERROR, e)
}

// ============ Status ============

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    active_watches: usize,
    mirror_count: usize,
    proxy_count: usize,
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_watches: state.scheduler().list_watches().len(),
        mirror_count: state.service().mirrors().len(),
        proxy_count: state.scheduler().proxies().len(),
    })
}

// ============ One-shot lookup ============

#[derive(Serialize)]
struct LookupResponse {
    verdict: Verdict,
    endpoint: Option<String>,
    response_time: f64,
}

async fn lookup_profile(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Json<LookupResponse> {
    let report = state.service().lookup(&handle, None).await;
    Json(LookupResponse {
        verdict: report.verdict,
        endpoint: report.endpoint,
        response_time: report.response_time,
    })
}

// ============ Watches ============

#[derive(Deserialize)]
struct StartWatchRequest {
    handle: String,
    kind: WatchKind,
    operator: i64,
}

#[derive(Deserialize)]
struct OperatorQuery {
    operator: i64,
}

async fn start_watch(
    State(state): State<AppState>,
    Json(req): Json<StartWatchRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .scheduler()
        .start_watch(&req.handle, req.kind, req.operator)
        .await
        .map_err(monitor_err)?;
    Ok(StatusCode::CREATED)
}

async fn stop_watch(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Query(q): Query<OperatorQuery>,
) -> Result<StatusCode, ApiError> {
    state.scheduler().stop_watch(&handle, q.operator).await.map_err(monitor_err)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_watches(State(state): State<AppState>) -> Json<Vec<WatchSummary>> {
    Json(state.scheduler().list_watches())
}

// ============ Stats ============

#[derive(Serialize)]
struct StatsResponse {
    monitor: MonitorStatsSnapshot,
    store: StoreSummary,
    mirrors: Vec<EndpointStatsSnapshot>,
    proxies: Vec<EndpointStatsSnapshot>,
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let store = state.store().summary().await.map_err(store_err)?;
    Ok(Json(StatsResponse {
        monitor: state.scheduler().stats(),
        store,
        mirrors: state.service().mirrors().snapshots(),
        proxies: state.scheduler().proxies().snapshots(),
    }))
}

#[derive(Deserialize)]
struct SessionsQuery {
    #[serde(default = "default_session_limit")]
    limit: u32,
}

fn default_session_limit() -> u32 {
    50
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(q): Query<SessionsQuery>,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    let sessions = state.store().list_sessions(q.limit).await.map_err(store_err)?;
    Ok(Json(sessions))
}

// ============ Mirror endpoints and proxies ============

#[derive(Deserialize)]
struct UrlRequest {
    url: String,
}

#[derive(Deserialize)]
struct TestRequest {
    /// Probe target, e.g. a mirror base URL or an IP-echo service.
    url: String,
    /// Optional proxy to route the probe through.
    proxy: Option<String>,
}

async fn list_endpoints(State(state): State<AppState>) -> Json<Vec<EndpointStatsSnapshot>> {
    Json(state.service().mirrors().snapshots())
}

async fn add_endpoint(
    State(state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> Result<StatusCode, ApiError> {
    if state.service().mirrors().add(&req.url) {
        Ok(StatusCode::CREATED)
    } else {
        Err(err(StatusCode::CONFLICT, format!("endpoint {} already present", req.url)))
    }
}

async fn remove_endpoint(
    State(state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> Result<StatusCode, ApiError> {
    if state.service().mirrors().remove(&req.url) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(err(StatusCode::NOT_FOUND, format!("endpoint {} not found", req.url)))
    }
}

async fn test_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TestRequest>,
) -> Json<ProbeReport> {
    Json(state.client().probe(&req.url, req.proxy.as_deref()).await)
}

async fn list_proxies(State(state): State<AppState>) -> Json<Vec<EndpointStatsSnapshot>> {
    Json(state.scheduler().proxies().snapshots())
}

async fn add_proxy(
    State(state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> Result<StatusCode, ApiError> {
    if state.scheduler().proxies().add(&req.url) {
        Ok(StatusCode::CREATED)
    } else {
        Err(err(StatusCode::CONFLICT, format!("proxy {} already present", req.url)))
    }
}

async fn remove_proxy(
    State(state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> Result<StatusCode, ApiError> {
    if state.scheduler().proxies().remove(&req.url) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(err(StatusCode::NOT_FOUND, format!("proxy {} not found", req.url)))
    }
}

// ============ Authorized operators ============

#[derive(Deserialize)]
struct UserRequest {
    user_id: i64,
    operator: i64,
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<i64>>, ApiError> {
    let users = state.store().list_users().await.map_err(store_err)?;
    Ok(Json(users))
}

async fn add_user(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> Result<StatusCode, ApiError> {
    if !state.is_owner(req.operator) {
        return Err(err(StatusCode::FORBIDDEN, "only the owner can manage users"));
    }
    state.store().add_user(req.user_id).await.map_err(store_err)?;
    Ok(StatusCode::CREATED)
}

async fn remove_user(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> Result<StatusCode, ApiError> {
    if !state.is_owner(req.operator) {
        return Err(err(StatusCode::FORBIDDEN, "only the owner can manage users"));
    }
    if state.store().remove_user(req.user_id).await.map_err(store_err)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(err(StatusCode::NOT_FOUND, format!("user {} not found", req.user_id)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests;
