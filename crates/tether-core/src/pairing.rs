//! Pairing coordination: session codes, one-time passwords, and
//! credential issuance.
//!
//! A pairing session is a short-lived shared secret in two halves. The
//! display `code` travels to the client in-band when the session is
//! started; the OTP travels out-of-band (the Host operator reads it off
//! the Host console). Redeeming the pair exactly once yields a durable
//! bearer credential delivered through the Request/Response Channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::commands::AuthenticateGrant;
use crate::ident::{generate_credential, generate_otp, generate_session_code, generate_session_id};
use crate::store::{RelayStore, StoreError};
use crate::types::{now_ms, PairingSession};

/// How long a pairing session stays redeemable.
pub const SESSION_TTL: Duration = Duration::from_secs(300);

/// Failed OTP entries tolerated per session before it is refused.
pub const MAX_REDEEM_ATTEMPTS: u32 = 5;

/// Upper bound on `open_sessions` results.
pub const OPEN_SESSIONS_CAP: usize = 50;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from pairing operations.
#[derive(Debug, Error, Clone)]
pub enum PairingError {
    /// No such session, or the session has expired.
    #[error("invalid or expired session")]
    InvalidSession,

    /// The session's OTP was already redeemed.
    #[error("session already consumed")]
    AlreadyConsumed,

    /// The supplied OTP does not match the session secret.
    #[error("OTP mismatch")]
    OtpMismatch,

    /// The session accumulated too many failed OTP entries.
    #[error("too many failed attempts for this session")]
    TooManyAttempts,

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Pairing Coordinator
// ============================================================================

/// Result of `start_session`. Carries everything the client may see;
/// the OTP is deliberately absent and only reachable through the Host
/// console path (`open_sessions`).
#[derive(Clone, Debug)]
pub struct StartedSession {
    pub session_id: String,
    pub code: String,
}

/// Issues pairing sessions and redeems OTPs for credentials.
///
/// The failed-attempt count is process-local by design: it guards the
/// redeeming Host against OTP guessing and resets with a fresh session,
/// so it has no business in the shared store.
pub struct PairingCoordinator<S: RelayStore> {
    store: Arc<S>,
    /// Failed redemptions per session id.
    attempts: RwLock<HashMap<String, u32>>,
}

impl<S: RelayStore> PairingCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a fresh session: random id, display code, and OTP secret.
    /// The session is persisted unconsumed with a [`SESSION_TTL`]
    /// expiry; only the id and code are returned.
    pub async fn start_session(&self) -> Result<StartedSession, PairingError> {
        let now = now_ms();
        let session = PairingSession {
            session_id: generate_session_id(),
            code: generate_session_code(),
            otp: generate_otp(),
            created_at: now,
            expires_at: now + SESSION_TTL.as_millis() as u64,
            consumed: false,
        };
        self.store.insert_session(session.clone()).await?;
        info!(session_id = %session.session_id, code = %session.code, "pairing session started");
        Ok(StartedSession {
            session_id: session.session_id,
            code: session.code,
        })
    }

    /// Redeem by session id. See [`Self::redeem_by_code`].
    pub async fn redeem_by_id(
        &self,
        session_id: &str,
        otp: &str,
        client_id: &str,
    ) -> Result<String, PairingError> {
        let session = self.store.session_by_id(session_id).await?;
        self.redeem(session, otp, client_id).await
    }

    /// Redeem by display code: validate the OTP against the session,
    /// consume the session (first writer wins), and complete the
    /// matching Command Request with a freshly issued credential. The
    /// credential is also returned to the caller.
    ///
    /// Failure does not touch the Command Request; mapping a pairing
    /// error to a terminal `fail` is the dispatcher's call.
    pub async fn redeem_by_code(
        &self,
        code: &str,
        otp: &str,
        client_id: &str,
    ) -> Result<String, PairingError> {
        let session = self.store.session_by_code(code).await?;
        self.redeem(session, otp, client_id).await
    }

    /// List unconsumed, unexpired sessions so the Host console can show
    /// each code and OTP to the operator.
    pub async fn open_sessions(&self, now_ms: u64) -> Result<Vec<PairingSession>, PairingError> {
        let open = self.store.open_sessions(OPEN_SESSIONS_CAP).await?;
        Ok(open.into_iter().filter(|s| !s.is_expired(now_ms)).collect())
    }

    async fn redeem(
        &self,
        session: Option<PairingSession>,
        otp: &str,
        client_id: &str,
    ) -> Result<String, PairingError> {
        let session = session.ok_or(PairingError::InvalidSession)?;
        if session.is_expired(now_ms()) {
            return Err(PairingError::InvalidSession);
        }
        if session.consumed {
            return Err(PairingError::AlreadyConsumed);
        }

        // Refuse the session outright once the guess budget is spent,
        // even if this attempt carries the right OTP.
        {
            let attempts = self.attempts.read().await;
            if attempts.get(&session.session_id).copied().unwrap_or(0) >= MAX_REDEEM_ATTEMPTS {
                warn!(session_id = %session.session_id, "session refused after too many failed attempts");
                return Err(PairingError::TooManyAttempts);
            }
        }

        if session.otp != otp {
            let mut attempts = self.attempts.write().await;
            let count = attempts.entry(session.session_id.clone()).or_insert(0);
            *count += 1;
            warn!(session_id = %session.session_id, failed_attempts = *count, "OTP mismatch");
            return Err(PairingError::OtpMismatch);
        }

        // CAS: a concurrent redeemer may have consumed it between our
        // read and this write.
        if !self.store.consume_session(&session.session_id).await? {
            return Err(PairingError::AlreadyConsumed);
        }
        self.attempts.write().await.remove(&session.session_id);

        let credential = generate_credential();
        let payload = serde_json::to_value(AuthenticateGrant {
            credential: credential.clone(),
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let applied = self.store.complete_request(client_id, payload).await?;
        if applied {
            info!(session_id = %session.session_id, client_id, "pairing redeemed, credential issued");
        } else {
            // The request raced to terminal without us; the session is
            // still spent and the credential never reaches anyone.
            warn!(session_id = %session.session_id, client_id, "credential discarded, request already terminal");
        }
        Ok(credential)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
