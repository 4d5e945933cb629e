//! Test harness for the relay protocol.
//!
//! Record builders with predictable contents, plus an end-to-end driver
//! that runs the full pairing exchange (client flow on one side, Host
//! redemption on the other) over a single shared store. Used by the
//! unit suites here and by the integration tests.

use std::sync::Arc;

use crate::channel::CommandChannel;
use crate::client::{FlowError, FlowState, PairingFlow};
use crate::commands::{self, AuthenticateRequest};
use crate::pairing::{PairingCoordinator, SESSION_TTL};
use crate::presence::PresenceTracker;
use crate::store::RelayStore;
use crate::types::{now_ms, CommandRequest, HostRecord, HostStatus, PairingSession, Workload};

/// Build a workload with fixed pid and timestamps.
pub fn make_workload(path: &str, port: u16) -> Workload {
    Workload {
        path: path.to_string(),
        port,
        pid: 4242,
        started_at: 1_700_000_000_000,
        last_activity: 1_700_000_000_000,
    }
}

/// Build an online Host record with no workloads.
pub fn make_host_record(host_id: &str, last_seen: u64) -> HostRecord {
    HostRecord {
        host_id: host_id.to_string(),
        status: HostStatus::Online,
        active_workloads: Vec::new(),
        version: "0.1.0".to_string(),
        platform: "linux".to_string(),
        last_seen,
    }
}

/// Build an unconsumed pairing session expiring [`SESSION_TTL`] after
/// `created_at`.
pub fn make_session(session_id: &str, code: &str, otp: &str, created_at: u64) -> PairingSession {
    PairingSession {
        session_id: session_id.to_string(),
        code: code.to_string(),
        otp: otp.to_string(),
        created_at,
        expires_at: created_at + SESSION_TTL.as_millis() as u64,
        consumed: false,
    }
}

/// Build a pending `authenticate` request.
pub fn make_request(client_id: &str, host_id: &str, created_at: u64) -> CommandRequest {
    CommandRequest::pending(
        client_id,
        host_id,
        commands::AUTHENTICATE,
        serde_json::json!({"sessionCode": "ABC123", "otp": "482913"}),
        created_at,
    )
}

/// Answer the oldest pending `authenticate` request for `host_id` the
/// way the Host agent would: decode the payload, redeem, and on a
/// pairing error write the failure back through the channel.
pub async fn redeem_first_pending<S: RelayStore>(store: Arc<S>, host_id: &str) {
    let coordinator = PairingCoordinator::new(store.clone());
    let channel = CommandChannel::new(store);

    let pending = channel
        .pending_for(host_id)
        .await
        .expect("pending queue read");
    let request = pending.first().expect("a pending request to answer");

    let auth: AuthenticateRequest =
        commands::from_payload(&request.payload).expect("authenticate payload");
    if let Err(e) = coordinator
        .redeem_by_code(&auth.session_code, &auth.otp, &request.client_id)
        .await
    {
        channel
            .fail(&request.client_id, &e.to_string())
            .await
            .expect("failure write");
    }
}

/// Run a complete pairing flow over one shared store and return the
/// issued credential.
///
/// 1. Host announces itself online.
/// 2. Client starts a session and receives the display code.
/// 3. The OTP crosses out-of-band: here, read from the open-session
///    console view.
/// 4. Client submits the authenticate request.
/// 5. Host redeems it, completing the request with a credential.
/// 6. Client observes the terminal state and authenticates.
pub async fn run_pairing_flow<S: RelayStore>(
    store: Arc<S>,
    host_id: &str,
) -> Result<String, FlowError> {
    let presence = PresenceTracker::new(store.clone());
    presence
        .announce(host_id, HostStatus::Online, Vec::new(), "0.1.0", "test")
        .await
        .map_err(crate::channel::ChannelError::from)?;

    let mut flow = PairingFlow::new(store.clone(), host_id);
    let code = flow.start().await?;

    let coordinator = PairingCoordinator::new(store.clone());
    let otp = coordinator
        .open_sessions(now_ms())
        .await?
        .into_iter()
        .find(|s| s.code == code)
        .expect("started session visible on the console")
        .otp;

    flow.submit_otp(&otp).await?;
    redeem_first_pending(store, host_id).await;

    let state = flow.await_outcome().await?;
    match state {
        FlowState::Authenticated { credential } => Ok(credential.clone()),
        other => panic!("pairing flow did not authenticate: {}", other.name()),
    }
}
