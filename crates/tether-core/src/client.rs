//! Client-side pairing flow.
//!
//! Mirrors what the mobile screen does: start a session, show the code,
//! take the operator-relayed OTP, submit an `authenticate` request, and
//! watch it until the Host answers. One flow instance is one logical
//! pairing attempt against one Host; retrying after failure starts a
//! fresh session under a fresh correlation id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::channel::{ChannelError, CommandChannel};
use crate::commands::{self, AuthenticateGrant, AuthenticateRequest};
use crate::ident::generate_client_id;
use crate::pairing::{PairingCoordinator, PairingError};
use crate::store::{RelayStore, StoreError};
use crate::types::RequestStatus;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from driving the pairing flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Operation not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

// ============================================================================
// Client Session State
// ============================================================================

/// Where the client stands with its Host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Disconnected,
    Pairing,
    Authenticated,
}

/// Process-local session state, persisted by the client as a
/// cross-restart cache. Owned by the client alone; never shared through
/// the relay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    /// The bearer credential from a successful pairing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    pub status: ClientStatus,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self {
            host_id: None,
            jwt: None,
            status: ClientStatus::Disconnected,
        }
    }
}

impl ClientSession {
    pub fn is_authenticated(&self) -> bool {
        self.status == ClientStatus::Authenticated && self.jwt.is_some()
    }
}

// ============================================================================
// Pairing Flow State Machine
// ============================================================================

/// State of one pairing attempt.
#[derive(Clone, Debug)]
pub enum FlowState {
    /// Nothing in flight.
    Idle,
    /// `start_session` is being issued.
    SessionStarting,
    /// Session open; waiting for the user to type the OTP they read off
    /// the Host console.
    AwaitingOtpEntry { session_id: String, code: String },
    /// The authenticate request is being submitted.
    Submitting { client_id: String },
    /// Submitted; polling for the Host's terminal answer.
    AwaitingHostResponse { client_id: String },
    /// Credential received and recorded in the session.
    Authenticated { credential: String },
    /// Terminal failure; the reason is what the Host (or transport)
    /// reported. Start again to retry.
    Failed { reason: String },
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::SessionStarting => "session-starting",
            FlowState::AwaitingOtpEntry { .. } => "awaiting-otp-entry",
            FlowState::Submitting { .. } => "submitting",
            FlowState::AwaitingHostResponse { .. } => "awaiting-host-response",
            FlowState::Authenticated { .. } => "authenticated",
            FlowState::Failed { .. } => "failed",
        }
    }
}

/// Drives pairing against one Host over a shared store.
pub struct PairingFlow<S: RelayStore> {
    state: FlowState,
    host_id: String,
    coordinator: PairingCoordinator<S>,
    channel: CommandChannel<S>,
    session: ClientSession,
}

impl<S: RelayStore> PairingFlow<S> {
    pub fn new(store: Arc<S>, host_id: impl Into<String>) -> Self {
        let host_id = host_id.into();
        Self {
            state: FlowState::Idle,
            session: ClientSession {
                host_id: Some(host_id.clone()),
                jwt: None,
                status: ClientStatus::Disconnected,
            },
            host_id,
            coordinator: PairingCoordinator::new(store.clone()),
            channel: CommandChannel::new(store),
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// The session as the flow currently sees it. Persisting it is the
    /// embedder's job.
    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, FlowState::Authenticated { .. })
    }

    /// Open a pairing session and return its display code. Valid from
    /// `Idle` or `Failed`; a failed attempt is retried only through
    /// here, with a fresh session.
    pub async fn start(&mut self) -> Result<String, FlowError> {
        match &self.state {
            FlowState::Idle | FlowState::Failed { .. } => {}
            other => {
                return Err(FlowError::InvalidState(format!(
                    "cannot start a session from {}",
                    other.name()
                )));
            }
        }

        self.state = FlowState::SessionStarting;
        self.session.status = ClientStatus::Pairing;
        self.session.jwt = None;

        let started = match self.coordinator.start_session().await {
            Ok(started) => started,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e.into());
            }
        };

        debug!(session_id = %started.session_id, code = %started.code, "pairing session open");
        let code = started.code.clone();
        self.state = FlowState::AwaitingOtpEntry {
            session_id: started.session_id,
            code: started.code,
        };
        Ok(code)
    }

    /// Bundle the session code with the user-entered OTP and submit the
    /// `authenticate` request under a freshly minted correlation id.
    pub async fn submit_otp(&mut self, otp: &str) -> Result<(), FlowError> {
        let code = match &self.state {
            FlowState::AwaitingOtpEntry { code, .. } => code.clone(),
            other => {
                return Err(FlowError::InvalidState(format!(
                    "cannot submit an OTP from {}",
                    other.name()
                )));
            }
        };

        let client_id = generate_client_id("auth");
        self.state = FlowState::Submitting {
            client_id: client_id.clone(),
        };

        let payload = commands::to_payload(&AuthenticateRequest {
            session_code: code,
            otp: otp.to_string(),
        })
        .map_err(|e| ChannelError::Store(StoreError::Serialization(e.to_string())))?;

        if let Err(e) = self
            .channel
            .submit(&self.host_id, commands::AUTHENTICATE, payload, &client_id)
            .await
        {
            self.fail(e.to_string());
            return Err(e.into());
        }

        self.state = FlowState::AwaitingHostResponse { client_id };
        Ok(())
    }

    /// Poll until the Host answers and settle into `Authenticated` or
    /// `Failed`. Transport errors leave the state untouched so the call
    /// can simply be repeated; deadlines are the caller's to layer on.
    pub async fn await_outcome(&mut self) -> Result<&FlowState, FlowError> {
        let client_id = match &self.state {
            FlowState::AwaitingHostResponse { client_id } => client_id.clone(),
            other => {
                return Err(FlowError::InvalidState(format!(
                    "nothing to await from {}",
                    other.name()
                )));
            }
        };

        let request = self.channel.await_response(&client_id).await?;
        match request.status {
            RequestStatus::Completed => {
                let grant = request
                    .response
                    .as_ref()
                    .and_then(|v| commands::from_payload::<AuthenticateGrant>(v).ok());
                match grant {
                    Some(grant) => {
                        info!(host_id = %self.host_id, "pairing authenticated");
                        self.session.jwt = Some(grant.credential.clone());
                        self.session.status = ClientStatus::Authenticated;
                        self.state = FlowState::Authenticated {
                            credential: grant.credential,
                        };
                    }
                    None => self.fail("completed without a credential".to_string()),
                }
            }
            RequestStatus::Failed => {
                self.fail(
                    request
                        .error
                        .unwrap_or_else(|| "authentication failed".to_string()),
                );
            }
            // await_response only yields terminal requests; a pending
            // read would mean the store broke its contract. Stay put.
            RequestStatus::Pending => {}
        }
        Ok(&self.state)
    }

    /// Abandon the attempt and return to `Idle`. Any pending request is
    /// simply left to the store's retention policy.
    pub fn reset(&mut self) {
        self.state = FlowState::Idle;
        if self.session.status == ClientStatus::Pairing {
            self.session.status = ClientStatus::Disconnected;
        }
    }

    fn fail(&mut self, reason: String) {
        info!(host_id = %self.host_id, %reason, "pairing failed");
        self.session.status = ClientStatus::Disconnected;
        self.state = FlowState::Failed { reason };
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
