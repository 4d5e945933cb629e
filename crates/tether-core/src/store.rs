//! Storage abstraction for Host records, pairing sessions, and command
//! requests.
//!
//! This module defines the `RelayStore` trait and provides an in-memory
//! implementation. The trait is the protocol's only contact with storage:
//! inserts, conditional patches by id, and capped equality-indexed reads.
//! All timestamps are caller-supplied Unix milliseconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{CommandRequest, HostPatch, HostRecord, HostStatus, PairingSession, RequestStatus};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// Store Trait
// ============================================================================

/// Storage abstraction shared by every protocol component.
///
/// Conditional operations (`patch_host`, `consume_session`,
/// `complete_request`, `fail_request`) are atomic with respect to each
/// other on the same key; implementations must guarantee first-write-wins
/// for terminal request writes and session consumption.
#[async_trait]
pub trait RelayStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Host Records
    // -------------------------------------------------------------------------

    /// Insert or replace a Host record.
    async fn put_host(&self, record: HostRecord) -> Result<(), StoreError>;

    /// Apply a partial update to a Host record.
    ///
    /// Returns `Ok(false)` when no record exists for `host_id`; absent
    /// patch fields leave the stored values untouched.
    async fn patch_host(&self, host_id: &str, patch: HostPatch) -> Result<bool, StoreError>;

    /// Fetch one Host record.
    async fn get_host(&self, host_id: &str) -> Result<Option<HostRecord>, StoreError>;

    /// List Host records with the given status, at most `limit` entries.
    /// Order is not specified.
    async fn hosts_with_status(
        &self,
        status: HostStatus,
        limit: usize,
    ) -> Result<Vec<HostRecord>, StoreError>;

    // -------------------------------------------------------------------------
    // Pairing Sessions
    // -------------------------------------------------------------------------

    /// Insert a new pairing session.
    ///
    /// Fails with `AlreadyExists` if the session id is taken.
    async fn insert_session(&self, session: PairingSession) -> Result<(), StoreError>;

    /// Fetch a session by its id.
    async fn session_by_id(&self, session_id: &str) -> Result<Option<PairingSession>, StoreError>;

    /// Fetch a session by its display code.
    async fn session_by_code(&self, code: &str) -> Result<Option<PairingSession>, StoreError>;

    /// Mark a session consumed, first writer wins.
    ///
    /// Returns `Ok(true)` if this call flipped the flag, `Ok(false)` if the
    /// session was already consumed, `NotFound` if it does not exist.
    async fn consume_session(&self, session_id: &str) -> Result<bool, StoreError>;

    /// List unconsumed sessions, at most `limit` entries. Callers filter
    /// expiry themselves since "now" is theirs to supply.
    async fn open_sessions(&self, limit: usize) -> Result<Vec<PairingSession>, StoreError>;

    // -------------------------------------------------------------------------
    // Command Requests
    // -------------------------------------------------------------------------

    /// Insert a new pending request.
    ///
    /// Fails with `AlreadyExists` when the correlation id has been used
    /// before; a correlation id never produces a second request.
    async fn insert_request(&self, request: CommandRequest) -> Result<(), StoreError>;

    /// Fetch the current state of a request by correlation id.
    async fn get_request(&self, client_id: &str) -> Result<Option<CommandRequest>, StoreError>;

    /// Fetch a request, hinting that the caller is waiting for a terminal
    /// state. Backends that can block server-side (the HTTP relay) hold the
    /// read up to `wait`; the default is a plain read.
    async fn get_request_wait(
        &self,
        client_id: &str,
        _wait: Duration,
    ) -> Result<Option<CommandRequest>, StoreError> {
        self.get_request(client_id).await
    }

    /// List pending requests targeting a Host, oldest first, at most
    /// `limit` entries.
    async fn pending_for(
        &self,
        host_id: &str,
        limit: usize,
    ) -> Result<Vec<CommandRequest>, StoreError>;

    /// List pending requests, hinting that the caller will wait for work.
    /// Backends that can block server-side hold an empty read up to `wait`;
    /// the default is a plain read.
    async fn pending_for_wait(
        &self,
        host_id: &str,
        limit: usize,
        _wait: Duration,
    ) -> Result<Vec<CommandRequest>, StoreError> {
        self.pending_for(host_id, limit).await
    }

    /// Terminal write: mark a request completed with a response payload.
    ///
    /// Returns `Ok(true)` if this call made the request terminal,
    /// `Ok(false)` if it already was (the response is discarded),
    /// `NotFound` if no such request exists.
    async fn complete_request(&self, client_id: &str, response: Value)
        -> Result<bool, StoreError>;

    /// Terminal write: mark a request failed with an error message.
    ///
    /// Same first-write-wins contract as `complete_request`.
    async fn fail_request(&self, client_id: &str, error: &str) -> Result<bool, StoreError>;
}

// ============================================================================
// In-Memory Relay Implementation
// ============================================================================

/// Thread-safe in-memory store.
///
/// Serves embedded single-process deployments and tests directly, and
/// backs the relay service for distributed ones. Lookups by secondary key
/// (code, status, target host) are linear scans; the tables involved stay
/// small by construction.
#[derive(Default, Clone)]
pub struct MemoryRelay {
    /// Host records indexed by host_id
    hosts: Arc<RwLock<HashMap<String, HostRecord>>>,
    /// Pairing sessions indexed by session_id
    sessions: Arc<RwLock<HashMap<String, PairingSession>>>,
    /// Command requests indexed by client_id (correlation id)
    requests: Arc<RwLock<HashMap<String, CommandRequest>>>,
}

impl MemoryRelay {
    /// Create a new empty relay store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new relay store wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Delete sessions whose expiry has passed. Returns how many were
    /// removed. Retention policy, not protocol: only sweeps call this.
    pub async fn delete_expired_sessions(&self, now_ms: u64) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now_ms));
        before - sessions.len()
    }

    /// Delete terminal requests created before `cutoff_ms` and return
    /// their correlation ids. Pending requests are never evicted
    /// regardless of age.
    pub async fn evict_terminal_requests(&self, cutoff_ms: u64) -> Vec<String> {
        let mut requests = self.requests.write().await;
        let doomed: Vec<String> = requests
            .values()
            .filter(|r| r.is_terminal() && r.created_at < cutoff_ms)
            .map(|r| r.client_id.clone())
            .collect();
        for id in &doomed {
            requests.remove(id);
        }
        doomed
    }
}

#[async_trait]
impl RelayStore for MemoryRelay {
    // -------------------------------------------------------------------------
    // Host Records
    // -------------------------------------------------------------------------

    async fn put_host(&self, record: HostRecord) -> Result<(), StoreError> {
        let mut hosts = self.hosts.write().await;
        hosts.insert(record.host_id.clone(), record);
        Ok(())
    }

    async fn patch_host(&self, host_id: &str, patch: HostPatch) -> Result<bool, StoreError> {
        let mut hosts = self.hosts.write().await;
        match hosts.get_mut(host_id) {
            Some(record) => {
                if let Some(status) = patch.status {
                    record.status = status;
                }
                if let Some(workloads) = patch.active_workloads {
                    record.active_workloads = workloads;
                }
                if let Some(last_seen) = patch.last_seen {
                    record.last_seen = last_seen;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_host(&self, host_id: &str) -> Result<Option<HostRecord>, StoreError> {
        let hosts = self.hosts.read().await;
        Ok(hosts.get(host_id).cloned())
    }

    async fn hosts_with_status(
        &self,
        status: HostStatus,
        limit: usize,
    ) -> Result<Vec<HostRecord>, StoreError> {
        let hosts = self.hosts.read().await;
        Ok(hosts
            .values()
            .filter(|h| h.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    // -------------------------------------------------------------------------
    // Pairing Sessions
    // -------------------------------------------------------------------------

    async fn insert_session(&self, session: PairingSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::AlreadyExists(session.session_id));
        }
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn session_by_id(&self, session_id: &str) -> Result<Option<PairingSession>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn session_by_code(&self, code: &str) -> Result<Option<PairingSession>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().find(|s| s.code == code).cloned())
    }

    async fn consume_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) if session.consumed => Ok(false),
            Some(session) => {
                session.consumed = true;
                Ok(true)
            }
            None => Err(StoreError::NotFound(format!("session {session_id}"))),
        }
    }

    async fn open_sessions(&self, limit: usize) -> Result<Vec<PairingSession>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| !s.consumed)
            .take(limit)
            .cloned()
            .collect())
    }

    // -------------------------------------------------------------------------
    // Command Requests
    // -------------------------------------------------------------------------

    async fn insert_request(&self, request: CommandRequest) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.client_id) {
            return Err(StoreError::AlreadyExists(request.client_id));
        }
        requests.insert(request.client_id.clone(), request);
        Ok(())
    }

    async fn get_request(&self, client_id: &str) -> Result<Option<CommandRequest>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.get(client_id).cloned())
    }

    async fn pending_for(
        &self,
        host_id: &str,
        limit: usize,
    ) -> Result<Vec<CommandRequest>, StoreError> {
        let requests = self.requests.read().await;
        let mut pending: Vec<CommandRequest> = requests
            .values()
            .filter(|r| r.host_id == host_id && r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn complete_request(
        &self,
        client_id: &str,
        response: Value,
    ) -> Result<bool, StoreError> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(client_id) {
            Some(request) if request.is_terminal() => Ok(false),
            Some(request) => {
                request.status = RequestStatus::Completed;
                request.response = Some(response);
                Ok(true)
            }
            None => Err(StoreError::NotFound(format!("request {client_id}"))),
        }
    }

    async fn fail_request(&self, client_id: &str, error: &str) -> Result<bool, StoreError> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(client_id) {
            Some(request) if request.is_terminal() => Ok(false),
            Some(request) => {
                request.status = RequestStatus::Failed;
                request.error = Some(error.to_string());
                Ok(true)
            }
            None => Err(StoreError::NotFound(format!("request {client_id}"))),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
