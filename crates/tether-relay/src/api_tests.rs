use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tower::ServiceExt;

use tether_core::harness::{make_host_record, make_request, make_session};
use tether_core::store::{MemoryRelay, RelayStore};
use tether_core::types::{now_ms, HostRecord, HostStatus, RequestStatus};

use crate::api::{self, AppState, AppliedBody, CompleteBody, ConsumedBody, FailBody};
use crate::config::RelayConfig;
use crate::metrics::RelayMetrics;
use crate::server::build_router;
use crate::wakeup::Wakeups;

fn test_state() -> (AppState, watch::Sender<bool>) {
    test_state_with(RelayConfig::default())
}

fn test_state_with(config: RelayConfig) -> (AppState, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        store: MemoryRelay::new_shared(),
        wakeups: Wakeups::new(),
        metrics: Arc::new(RelayMetrics::new().expect("metrics")),
        config,
        shutdown: shutdown_rx,
        started: Instant::now(),
    };
    (state, shutdown_tx)
}

fn json_bytes<T: Serialize>(value: &T) -> Bytes {
    Bytes::from(serde_json::to_vec(value).expect("serialize"))
}

async fn body_json<T: DeserializeOwned>(resp: Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("decode body")
}

fn no_query() -> Query<HashMap<String, String>> {
    Query(HashMap::new())
}

fn query(pairs: &[(&str, &str)]) -> Query<HashMap<String, String>> {
    Query(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

// -----------------------------------------------------------------------------
// Host handlers
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_put_then_get_host() {
    let (state, _shutdown) = test_state();
    let record = make_host_record("host-1", 100);

    let resp = api::put_host(
        State(state.clone()),
        Path("host-1".to_string()),
        json_bytes(&record),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = api::get_host(State(state), Path("host-1".to_string())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched: HostRecord = body_json(resp).await;
    assert_eq!(fetched.host_id, "host-1");
    assert_eq!(fetched.status, HostStatus::Online);
}

#[tokio::test]
async fn test_put_host_id_mismatch_is_400() {
    let (state, _shutdown) = test_state();
    let record = make_host_record("host-2", 100);

    let resp = api::put_host(State(state), Path("host-1".to_string()), json_bytes(&record)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_host_is_404() {
    let (state, _shutdown) = test_state();
    let resp = api::get_host(State(state), Path("host-missing".to_string())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_patch_absent_host_reports_not_applied() {
    let (state, _shutdown) = test_state();

    let resp = api::patch_host(
        State(state),
        Path("host-ghost".to_string()),
        Bytes::from_static(b"{\"status\":\"offline\"}"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: AppliedBody = body_json(resp).await;
    assert!(!body.applied);
}

#[tokio::test]
async fn test_patch_host_updates_status() {
    let (state, _shutdown) = test_state();
    state
        .store
        .put_host(make_host_record("host-1", 100))
        .await
        .unwrap();

    let resp = api::patch_host(
        State(state.clone()),
        Path("host-1".to_string()),
        Bytes::from_static(b"{\"status\":\"offline\",\"activeWorkloads\":[]}"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: AppliedBody = body_json(resp).await;
    assert!(body.applied);

    let stored = state.store.get_host("host-1").await.unwrap().unwrap();
    assert_eq!(stored.status, HostStatus::Offline);
}

#[tokio::test]
async fn test_list_hosts_filters_by_status() {
    let (state, _shutdown) = test_state();
    state
        .store
        .put_host(make_host_record("host-on", 100))
        .await
        .unwrap();
    let mut offline = make_host_record("host-off", 100);
    offline.status = HostStatus::Offline;
    state.store.put_host(offline).await.unwrap();

    let resp = api::list_hosts(State(state.clone()), query(&[("status", "online")])).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let hosts: Vec<HostRecord> = body_json(resp).await;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].host_id, "host-on");

    let resp = api::list_hosts(State(state), no_query()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let (state, _shutdown) = test_state();
    let resp = api::put_host(
        State(state),
        Path("host-1".to_string()),
        Bytes::from_static(b"not json"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// -----------------------------------------------------------------------------
// Session handlers
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_post_session_conflict_is_409() {
    let (state, _shutdown) = test_state();
    let session = make_session("sess-1", "ABCDEF", "123456", now_ms());

    let resp = api::post_session(State(state.clone()), json_bytes(&session)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = api::post_session(State(state), json_bytes(&session)).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_consume_session_is_single_use() {
    let (state, _shutdown) = test_state();
    state
        .store
        .insert_session(make_session("sess-1", "ABCDEF", "123456", now_ms()))
        .await
        .unwrap();

    let resp = api::consume_session(State(state.clone()), Path("sess-1".to_string())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: ConsumedBody = body_json(resp).await;
    assert!(body.consumed);

    let resp = api::consume_session(State(state.clone()), Path("sess-1".to_string())).await;
    let body: ConsumedBody = body_json(resp).await;
    assert!(!body.consumed);

    let resp = api::consume_session(State(state), Path("sess-ghost".to_string())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_sessions_requires_open_flag() {
    let (state, _shutdown) = test_state();
    state
        .store
        .insert_session(make_session("sess-1", "ABCDEF", "123456", now_ms()))
        .await
        .unwrap();

    let resp = api::list_sessions(State(state.clone()), query(&[("open", "true")])).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = api::list_sessions(State(state), no_query()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// -----------------------------------------------------------------------------
// Request handlers
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_post_request_duplicate_is_409() {
    let (state, _shutdown) = test_state();
    let request = make_request("req-1", "host-1", now_ms());

    let resp = api::post_request(State(state.clone()), json_bytes(&request)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = api::post_request(State(state), json_bytes(&request)).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_terminal_write_applied_flags() {
    let (state, _shutdown) = test_state();
    state
        .store
        .insert_request(make_request("req-1", "host-1", now_ms()))
        .await
        .unwrap();

    let resp = api::complete_request(
        State(state.clone()),
        Path("req-1".to_string()),
        json_bytes(&CompleteBody {
            response: serde_json::json!({"ok": true}),
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: AppliedBody = body_json(resp).await;
    assert!(body.applied);

    // Second terminal write loses the race and reports so.
    let resp = api::fail_request(
        State(state),
        Path("req-1".to_string()),
        json_bytes(&FailBody {
            error: "too late".to_string(),
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: AppliedBody = body_json(resp).await;
    assert!(!body.applied);
}

#[tokio::test]
async fn test_complete_unknown_request_is_404() {
    let (state, _shutdown) = test_state();
    let resp = api::complete_request(
        State(state),
        Path("req-ghost".to_string()),
        json_bytes(&CompleteBody {
            response: serde_json::json!({}),
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_request_long_poll_returns_on_complete() {
    let (state, _shutdown) = test_state();
    state
        .store
        .insert_request(make_request("req-1", "host-1", now_ms()))
        .await
        .unwrap();

    let writer_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        api::complete_request(
            State(writer_state),
            Path("req-1".to_string()),
            json_bytes(&CompleteBody {
                response: serde_json::json!({"granted": true}),
            }),
        )
        .await;
    });

    let started = Instant::now();
    let resp = api::get_request(
        State(state),
        Path("req-1".to_string()),
        query(&[("wait_ms", "5000")]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let request: tether_core::types::CommandRequest = body_json(resp).await;
    assert_eq!(request.status, RequestStatus::Completed);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_get_request_wait_expiry_returns_pending() {
    let (state, _shutdown) = test_state();
    state
        .store
        .insert_request(make_request("req-1", "host-1", now_ms()))
        .await
        .unwrap();

    let resp = api::get_request(
        State(state),
        Path("req-1".to_string()),
        query(&[("wait_ms", "100")]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let request: tether_core::types::CommandRequest = body_json(resp).await;
    assert_eq!(request.status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_get_unknown_request_is_404_without_waiting() {
    let (state, _shutdown) = test_state();

    let started = Instant::now();
    let resp = api::get_request(
        State(state),
        Path("req-ghost".to_string()),
        query(&[("wait_ms", "5000")]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_host_queue_long_poll_wakes_on_submit() {
    let (state, _shutdown) = test_state();

    let writer_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let request = make_request("req-1", "host-1", now_ms());
        api::post_request(State(writer_state), json_bytes(&request)).await;
    });

    let started = Instant::now();
    let resp = api::host_requests(
        State(state),
        Path("host-1".to_string()),
        query(&[("wait_ms", "5000")]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let batch: Vec<tether_core::types::CommandRequest> = body_json(resp).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].client_id, "req-1");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_wait_clamped_to_configured_max() {
    let config = RelayConfig {
        max_wait_ms: 100,
        ..Default::default()
    };
    let (state, _shutdown) = test_state_with(config);
    state
        .store
        .insert_request(make_request("req-1", "host-1", now_ms()))
        .await
        .unwrap();

    let started = Instant::now();
    let resp = api::get_request(
        State(state),
        Path("req-1".to_string()),
        query(&[("wait_ms", "60000")]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(started.elapsed() < Duration::from_secs(2));
}

// -----------------------------------------------------------------------------
// Router wiring
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_router_health() {
    let (state, _shutdown) = test_state();
    let app = build_router(state, 64 * 1024);

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_router_metrics_exports_prometheus_text() {
    let (state, _shutdown) = test_state();
    let app = build_router(state, 64 * 1024);

    let resp = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tether_relay_requests_submitted_total"));
}

#[tokio::test]
async fn test_router_host_roundtrip() {
    let (state, _shutdown) = test_state();
    let app = build_router(state, 64 * 1024);
    let record = make_host_record("host-1", 100);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v1/hosts/host-1")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&record).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/v1/hosts/host-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_router_session_by_code_route() {
    let (state, _shutdown) = test_state();
    state
        .store
        .insert_session(make_session("sess-1", "K7Q2ZX", "123456", now_ms()))
        .await
        .unwrap();
    let app = build_router(state, 64 * 1024);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/sessions/by-code/K7Q2ZX")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Static segment must not be captured by the id route.
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/v1/sessions/sess-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_router_rejects_oversized_body() {
    let (state, _shutdown) = test_state();
    let app = build_router(state, 64);

    let resp = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v1/hosts/host-1")
                .header("content-type", "application/json")
                .body(Body::from(vec![b'x'; 4096]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
