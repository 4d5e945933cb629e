//! Command implementations, generic over the store so the same logic
//! runs against the HTTP relay in the binary and `MemoryRelay` in
//! tests.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use tether_core::channel::CommandChannel;
use tether_core::client::{ClientSession, ClientStatus, FlowState, PairingFlow};
use tether_core::ident::generate_client_id;
use tether_core::presence::PresenceTracker;
use tether_core::store::RelayStore;
use tether_core::types::{HostRecord, RequestStatus};

/// Terminal outcome of one pairing attempt.
pub enum PairOutcome {
    Authenticated { session: ClientSession },
    Failed { reason: String },
    /// Deadline hit before the Host answered.
    TimedOut,
}

/// Outcome of one command submission.
pub enum SendOutcome {
    Completed { client_id: String, response: Value },
    Failed { client_id: String, error: String },
    /// Deadline hit; the request may still reach a terminal state later.
    StillPending { client_id: String },
}

/// What `status` reports: the cached session plus the target Host's
/// current presence record. The credential itself never leaves the
/// cache file.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub host_id: Option<String>,
    pub state: String,
    pub credential_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostRecord>,
}

/// Online Hosts, capped at the presence page size.
pub async fn list_hosts<S: RelayStore>(store: Arc<S>) -> anyhow::Result<Vec<HostRecord>> {
    Ok(PresenceTracker::new(store).list_online().await?)
}

/// A pairing attempt between session start and OTP submission. The
/// split keeps the interactive prompt out of the protocol path: the
/// caller shows [`PairAttempt::code`], collects the OTP however it
/// likes, then calls [`PairAttempt::finish`].
pub struct PairAttempt<S: RelayStore> {
    flow: PairingFlow<S>,
    code: String,
}

impl<S: RelayStore> PairAttempt<S> {
    /// The display code the operator matches against the Host console.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Submit the OTP and await the Host's verdict under `deadline`.
    pub async fn finish(mut self, otp: &str, deadline: Duration) -> anyhow::Result<PairOutcome> {
        self.flow.submit_otp(otp.trim()).await?;

        match tokio::time::timeout(deadline, self.flow.await_outcome()).await {
            Err(_elapsed) => return Ok(PairOutcome::TimedOut),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }

        match self.flow.state() {
            FlowState::Authenticated { .. } => Ok(PairOutcome::Authenticated {
                session: self.flow.session().clone(),
            }),
            FlowState::Failed { reason } => Ok(PairOutcome::Failed {
                reason: reason.clone(),
            }),
            other => Ok(PairOutcome::Failed {
                reason: format!("pairing stopped in state {}", other.name()),
            }),
        }
    }
}

/// Open a pairing session against `host_id`.
pub async fn begin_pair<S: RelayStore>(
    store: Arc<S>,
    host_id: &str,
) -> anyhow::Result<PairAttempt<S>> {
    let mut flow = PairingFlow::new(store, host_id);
    let code = flow.start().await?;
    debug!(%host_id, %code, "pairing session open");
    Ok(PairAttempt { flow, code })
}

/// Submit a command under a fresh correlation id and await the reply.
pub async fn send<S: RelayStore>(
    store: Arc<S>,
    host_id: &str,
    kind: &str,
    payload: Value,
    deadline: Duration,
) -> anyhow::Result<SendOutcome> {
    let channel = CommandChannel::new(store);
    let client_id = generate_client_id("cmd");
    channel.submit(host_id, kind, payload, &client_id).await?;
    debug!(%client_id, %kind, "request submitted");

    match tokio::time::timeout(deadline, channel.await_response(&client_id)).await {
        Ok(Ok(request)) => match request.status {
            RequestStatus::Completed => Ok(SendOutcome::Completed {
                client_id,
                response: request.response.unwrap_or(Value::Null),
            }),
            RequestStatus::Failed => Ok(SendOutcome::Failed {
                client_id,
                error: request
                    .error
                    .unwrap_or_else(|| "request failed".to_string()),
            }),
            // await_response only yields terminal states; treat a
            // pending read like an expired deadline.
            RequestStatus::Pending => Ok(SendOutcome::StillPending { client_id }),
        },
        Ok(Err(e)) => Err(e.into()),
        Err(_elapsed) => Ok(SendOutcome::StillPending { client_id }),
    }
}

/// Pair the cached session with the Host's live presence record.
pub async fn status<S: RelayStore>(
    store: Arc<S>,
    session: &ClientSession,
) -> anyhow::Result<StatusReport> {
    let host = match &session.host_id {
        Some(host_id) => PresenceTracker::new(store).get_status(host_id).await?,
        None => None,
    };
    let state = match session.status {
        ClientStatus::Disconnected => "disconnected",
        ClientStatus::Pairing => "pairing",
        ClientStatus::Authenticated => "authenticated",
    };
    Ok(StatusReport {
        host_id: session.host_id.clone(),
        state: state.to_string(),
        credential_present: session.jwt.is_some(),
        host,
    })
}
