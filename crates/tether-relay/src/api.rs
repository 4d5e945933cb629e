use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::watch;
use tokio::time::Duration;

use tether_core::channel::PENDING_PAGE_CAP;
use tether_core::pairing::OPEN_SESSIONS_CAP;
use tether_core::presence::ONLINE_PAGE_CAP;
use tether_core::store::{MemoryRelay, RelayStore, StoreError};
use tether_core::types::{CommandRequest, HostPatch, HostRecord, HostStatus, PairingSession};

use crate::config::RelayConfig;
use crate::metrics::RelayMetrics;
use crate::wakeup::Wakeups;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryRelay>,
    pub wakeups: Wakeups,
    pub metrics: Arc<RelayMetrics>,
    pub config: RelayConfig,
    pub shutdown: watch::Receiver<bool>,
    pub started: Instant,
}

#[derive(Serialize, Deserialize)]
pub struct CompleteBody {
    pub response: Value,
}

#[derive(Serialize, Deserialize)]
pub struct FailBody {
    pub error: String,
}

#[derive(Serialize, Deserialize)]
pub struct AppliedBody {
    pub applied: bool,
}

#[derive(Serialize, Deserialize)]
pub struct ConsumedBody {
    pub consumed: bool,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed body: {e}")).into_response())
}

fn error_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound(what) => (StatusCode::NOT_FOUND, what).into_response(),
        StoreError::AlreadyExists(id) => (StatusCode::CONFLICT, id).into_response(),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

/// Resolves only on a real shutdown signal. A closed channel means no
/// signal can ever arrive, so pend instead of faking one.
async fn shutdown_signaled(mut rx: watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await
}

async fn refresh_host_gauge(state: &AppState) {
    if let Ok(online) = state.store.hosts_with_status(HostStatus::Online, usize::MAX).await {
        state.metrics.online_hosts.set(online.len() as f64);
    }
}

async fn refresh_session_gauge(state: &AppState) {
    if let Ok(open) = state.store.open_sessions(usize::MAX).await {
        state.metrics.open_sessions.set(open.len() as f64);
    }
}

/// Hold a pending request until a terminal write lands or `wait`
/// expires, then return whatever state it is in.
async fn wait_for_terminal(
    state: &AppState,
    client_id: &str,
    wait: Duration,
) -> Result<Option<CommandRequest>, StoreError> {
    let deadline = tokio::time::Instant::now() + wait;
    let notify = state.wakeups.request_handle(client_id);
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        // Enable before the read so a write racing the check still wakes us.
        notified.as_mut().enable();

        match state.store.get_request(client_id).await? {
            None => return Ok(None),
            Some(request) if request.is_terminal() => return Ok(Some(request)),
            Some(request) => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(deadline) => return Ok(Some(request)),
                    _ = shutdown_signaled(state.shutdown.clone()) => return Ok(Some(request)),
                }
            }
        }
    }
}

/// Hold an empty work queue until a submit lands or `wait` expires.
async fn wait_for_pending(
    state: &AppState,
    host_id: &str,
    limit: usize,
    wait: Duration,
) -> Result<Vec<CommandRequest>, StoreError> {
    let deadline = tokio::time::Instant::now() + wait;
    let notify = state.wakeups.queue_handle(host_id);
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let batch = state.store.pending_for(host_id, limit).await?;
        if !batch.is_empty() {
            return Ok(batch);
        }
        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            _ = shutdown_signaled(state.shutdown.clone()) => return Ok(Vec::new()),
        }
    }
}

// PUT /v1/hosts/{host_id}
pub async fn put_host(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    body: Bytes,
) -> Response {
    let record: HostRecord = match parse_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if record.host_id != host_id {
        return (StatusCode::BAD_REQUEST, "host id mismatch").into_response();
    }

    match state.store.put_host(record).await {
        Ok(()) => {
            refresh_host_gauge(&state).await;
            (StatusCode::NO_CONTENT, "").into_response()
        }
        Err(e) => error_response(e),
    }
}

// PATCH /v1/hosts/{host_id}
pub async fn patch_host(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    body: Bytes,
) -> Response {
    let patch: HostPatch = match parse_body(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match state.store.patch_host(&host_id, patch).await {
        Ok(applied) => {
            refresh_host_gauge(&state).await;
            (StatusCode::OK, axum::Json(AppliedBody { applied })).into_response()
        }
        Err(e) => error_response(e),
    }
}

// GET /v1/hosts/{host_id}
pub async fn get_host(State(state): State<AppState>, Path(host_id): Path<String>) -> Response {
    match state.store.get_host(&host_id).await {
        Ok(Some(record)) => (StatusCode::OK, axum::Json(record)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("host {host_id}")).into_response(),
        Err(e) => error_response(e),
    }
}

// GET /v1/hosts?status=online&limit=50
pub async fn list_hosts(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let status = match params.get("status").map(String::as_str) {
        Some("online") => HostStatus::Online,
        Some("offline") => HostStatus::Offline,
        _ => return (StatusCode::BAD_REQUEST, "status must be online or offline").into_response(),
    };
    let limit = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(ONLINE_PAGE_CAP)
        .min(ONLINE_PAGE_CAP);

    match state.store.hosts_with_status(status, limit).await {
        Ok(hosts) => (StatusCode::OK, axum::Json(hosts)).into_response(),
        Err(e) => error_response(e),
    }
}

// POST /v1/sessions
pub async fn post_session(State(state): State<AppState>, body: Bytes) -> Response {
    let session: PairingSession = match parse_body(&body) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.store.insert_session(session).await {
        Ok(()) => {
            refresh_session_gauge(&state).await;
            (StatusCode::CREATED, "created").into_response()
        }
        Err(StoreError::AlreadyExists(id)) => {
            state.metrics.insert_conflicts.inc();
            (StatusCode::CONFLICT, format!("duplicate session {id}")).into_response()
        }
        Err(e) => error_response(e),
    }
}

// GET /v1/sessions/{session_id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.session_by_id(&session_id).await {
        Ok(Some(session)) => (StatusCode::OK, axum::Json(session)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("session {session_id}")).into_response(),
        Err(e) => error_response(e),
    }
}

// GET /v1/sessions/by-code/{code}
pub async fn get_session_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Response {
    match state.store.session_by_code(&code).await {
        Ok(Some(session)) => (StatusCode::OK, axum::Json(session)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("session code {code}")).into_response(),
        Err(e) => error_response(e),
    }
}

// GET /v1/sessions?open=true&limit=50
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("open").map(String::as_str) != Some("true") {
        return (StatusCode::BAD_REQUEST, "only open=true is supported").into_response();
    }
    let limit = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(OPEN_SESSIONS_CAP)
        .min(OPEN_SESSIONS_CAP);

    match state.store.open_sessions(limit).await {
        Ok(sessions) => (StatusCode::OK, axum::Json(sessions)).into_response(),
        Err(e) => error_response(e),
    }
}

// POST /v1/sessions/{session_id}/consume
pub async fn consume_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.consume_session(&session_id).await {
        Ok(consumed) => {
            refresh_session_gauge(&state).await;
            (StatusCode::OK, axum::Json(ConsumedBody { consumed })).into_response()
        }
        Err(StoreError::NotFound(what)) => (StatusCode::NOT_FOUND, what).into_response(),
        Err(e) => error_response(e),
    }
}

// POST /v1/requests
pub async fn post_request(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();
    let request: CommandRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let host_id = request.host_id.clone();

    match state.store.insert_request(request).await {
        Ok(()) => {
            state.metrics.requests_submitted.inc();
            state.wakeups.wake_queue(&host_id);
            state.metrics.request_latency.observe(start.elapsed().as_secs_f64());
            (StatusCode::CREATED, "created").into_response()
        }
        Err(StoreError::AlreadyExists(id)) => {
            state.metrics.insert_conflicts.inc();
            (StatusCode::CONFLICT, format!("duplicate correlation id {id}")).into_response()
        }
        Err(e) => error_response(e),
    }
}

// GET /v1/requests/{client_id}?wait_ms=30000
pub async fn get_request(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let start = Instant::now();
    let wait_ms: u64 = params
        .get("wait_ms")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
        .min(state.config.max_wait_ms);

    let result = if wait_ms == 0 {
        state.store.get_request(&client_id).await
    } else {
        wait_for_terminal(&state, &client_id, Duration::from_millis(wait_ms)).await
    };

    state.metrics.request_latency.observe(start.elapsed().as_secs_f64());
    match result {
        Ok(Some(request)) => (StatusCode::OK, axum::Json(request)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("request {client_id}")).into_response(),
        Err(e) => error_response(e),
    }
}

// GET /v1/hosts/{host_id}/requests?wait_ms=30000&limit=50
pub async fn host_requests(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let start = Instant::now();
    let limit = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(PENDING_PAGE_CAP)
        .min(PENDING_PAGE_CAP);
    let wait_ms: u64 = params
        .get("wait_ms")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
        .min(state.config.max_wait_ms);

    let result = if wait_ms == 0 {
        state.store.pending_for(&host_id, limit).await
    } else {
        wait_for_pending(&state, &host_id, limit, Duration::from_millis(wait_ms)).await
    };

    state.metrics.request_latency.observe(start.elapsed().as_secs_f64());
    match result {
        Ok(batch) => (StatusCode::OK, axum::Json(batch)).into_response(),
        Err(e) => error_response(e),
    }
}

// POST /v1/requests/{client_id}/complete
pub async fn complete_request(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let complete: CompleteBody = match parse_body(&body) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match state.store.complete_request(&client_id, complete.response).await {
        Ok(applied) => {
            if applied {
                state.metrics.requests_completed.inc();
                state.wakeups.wake_request(&client_id);
            }
            state.metrics.request_latency.observe(start.elapsed().as_secs_f64());
            (StatusCode::OK, axum::Json(AppliedBody { applied })).into_response()
        }
        Err(StoreError::NotFound(what)) => (StatusCode::NOT_FOUND, what).into_response(),
        Err(e) => error_response(e),
    }
}

// POST /v1/requests/{client_id}/fail
pub async fn fail_request(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let fail: FailBody = match parse_body(&body) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match state.store.fail_request(&client_id, &fail.error).await {
        Ok(applied) => {
            if applied {
                state.metrics.requests_failed.inc();
                state.wakeups.wake_request(&client_id);
            }
            state.metrics.request_latency.observe(start.elapsed().as_secs_f64());
            (StatusCode::OK, axum::Json(AppliedBody { applied })).into_response()
        }
        Err(StoreError::NotFound(what)) => (StatusCode::NOT_FOUND, what).into_response(),
        Err(e) => error_response(e),
    }
}

// GET /health
pub async fn get_health(State(state): State<AppState>) -> Response {
    use serde_json::json;

    let response = json!({
        "status": "healthy",
        "uptime_seconds": state.started.elapsed().as_secs_f64(),
        "version": env!("CARGO_PKG_VERSION"),
    });

    (StatusCode::OK, axum::Json(response)).into_response()
}

// GET /metrics
pub async fn get_metrics(State(state): State<AppState>) -> Response {
    let prometheus = state.metrics.export_prometheus();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        prometheus,
    )
        .into_response()
}
