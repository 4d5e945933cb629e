//! The agent's service core: one presence identity, one work loop.
//!
//! Generic over the store so the same dispatch logic runs against the
//! in-process relay in tests and the HTTP relay in the binary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tether_core::channel::{ChannelError, CommandChannel};
use tether_core::commands::{
    self, AuthenticateRequest, ChatAck, ChatMessage, DirectoryEntry, ListDirectoryRequest,
    ListDirectoryResponse,
};
use tether_core::pairing::{PairingCoordinator, PairingError};
use tether_core::presence::PresenceTracker;
use tether_core::store::{RelayStore, StoreError};
use tether_core::types::{now_ms, CommandRequest, HostStatus, Workload};

use crate::config::WorkloadConfig;

/// Stamp configured jobs into presence workloads. The agent reports its
/// own pid since it fronts them.
pub fn workloads_from_config(configs: &[WorkloadConfig]) -> Vec<Workload> {
    let now = now_ms();
    configs
        .iter()
        .map(|c| Workload {
            path: c.path.clone(),
            port: c.port,
            pid: std::process::id(),
            started_at: now,
            last_activity: now,
        })
        .collect()
}

pub struct HostAgent<S: RelayStore> {
    host_id: String,
    presence: PresenceTracker<S>,
    coordinator: PairingCoordinator<S>,
    channel: CommandChannel<S>,
    workloads: Mutex<Vec<Workload>>,
}

impl<S: RelayStore> HostAgent<S> {
    pub fn new(store: Arc<S>, host_id: impl Into<String>, workloads: Vec<Workload>) -> Self {
        Self {
            host_id: host_id.into(),
            presence: PresenceTracker::new(store.clone()),
            coordinator: PairingCoordinator::new(store.clone()),
            channel: CommandChannel::new(store),
            workloads: Mutex::new(workloads),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub async fn announce_online(&self, version: &str, platform: &str) -> Result<(), StoreError> {
        let snapshot = self.workloads.lock().await.clone();
        self.presence
            .announce(&self.host_id, HostStatus::Online, snapshot, version, platform)
            .await
    }

    /// One liveness beat carrying the current workload snapshot.
    pub async fn beat(&self) -> Result<bool, StoreError> {
        let snapshot = self.workloads.lock().await.clone();
        self.presence.heartbeat(&self.host_id, Some(snapshot)).await
    }

    pub async fn shutdown(&self) -> Result<bool, StoreError> {
        self.presence.mark_offline(&self.host_id).await
    }

    /// One pass of the work loop: drain the pending queue (long-poll up
    /// to `wait` when empty) and dispatch every request. Returns how
    /// many were serviced.
    pub async fn service_once(&self, wait: Duration) -> Result<usize, ChannelError> {
        let batch = self.channel.pending_for_wait(&self.host_id, wait).await?;
        for request in &batch {
            debug!(client_id = %request.client_id, kind = %request.kind, "servicing request");
            self.handle_request(request).await;
        }
        if !batch.is_empty() {
            // Push the refreshed lastActivity stamps out promptly
            // rather than waiting for the next heartbeat tick.
            self.beat().await?;
        }
        Ok(batch.len())
    }

    /// Print every newly-opened pairing session's code and OTP to the
    /// agent's stdout. This console is the out-of-band OTP path: the
    /// operator reads the digits here and relays them to the client.
    pub async fn print_new_sessions(&self, seen: &mut HashSet<String>) -> Result<(), PairingError> {
        let open = self.coordinator.open_sessions(now_ms()).await?;
        for session in &open {
            if seen.insert(session.session_id.clone()) {
                println!(
                    "pairing request  code {}  otp {}",
                    session.code, session.otp
                );
                info!(session_id = %session.session_id, code = %session.code, "pairing session open");
            }
        }
        seen.retain(|id| open.iter().any(|s| &s.session_id == id));
        Ok(())
    }

    async fn handle_request(&self, request: &CommandRequest) {
        let outcome = match request.kind.as_str() {
            commands::AUTHENTICATE => self.handle_authenticate(request).await,
            commands::LIST_DIRECTORY => self.handle_list_directory(request).await,
            commands::CHAT_MESSAGE => self.handle_chat(request).await,
            other => Err(format!("unsupported command type: {other}")),
        };

        if let Err(message) = outcome {
            warn!(client_id = %request.client_id, error = %message, "request failed");
            if let Err(e) = self.channel.fail(&request.client_id, &message).await {
                warn!(client_id = %request.client_id, error = %e, "failure write did not land");
            }
        }
    }

    /// Redeem the OTP. Success completes the request with the
    /// credential inside the coordinator; any pairing error becomes the
    /// request's failure message.
    async fn handle_authenticate(&self, request: &CommandRequest) -> Result<(), String> {
        let auth: AuthenticateRequest = commands::from_payload(&request.payload)
            .map_err(|e| format!("malformed authenticate payload: {e}"))?;
        self.coordinator
            .redeem_by_code(&auth.session_code, &auth.otp, &request.client_id)
            .await
            .map(|_credential| ())
            .map_err(|e| e.to_string())
    }

    async fn handle_list_directory(&self, request: &CommandRequest) -> Result<(), String> {
        let list: ListDirectoryRequest = commands::from_payload(&request.payload)
            .map_err(|e| format!("malformed list-directory payload: {e}"))?;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&list.path)
            .await
            .map_err(|e| format!("read {}: {e}", list.path))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| format!("read {}: {e}", list.path))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        self.touch_workloads(Some(&list.path)).await;
        let response = commands::to_payload(&ListDirectoryResponse {
            path: list.path,
            entries,
        })
        .map_err(|e| format!("encode response: {e}"))?;
        self.channel
            .complete(&request.client_id, response)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn handle_chat(&self, request: &CommandRequest) -> Result<(), String> {
        let message: ChatMessage = commands::from_payload(&request.payload)
            .map_err(|e| format!("malformed chat-message payload: {e}"))?;
        info!(from = %message.from, text = %message.text, "chat message received");

        self.touch_workloads(None).await;
        let ack = commands::to_payload(&ChatAck {
            delivered_at: now_ms(),
        })
        .map_err(|e| format!("encode response: {e}"))?;
        self.channel
            .complete(&request.client_id, ack)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Refresh `lastActivity` on the workloads a request touched: the
    /// ones whose path prefixes the request path, or all of them when
    /// the request carries no path.
    async fn touch_workloads(&self, path: Option<&str>) {
        let now = now_ms();
        let mut workloads = self.workloads.lock().await;
        for workload in workloads.iter_mut() {
            let touched = match path {
                Some(p) => p.starts_with(&workload.path),
                None => true,
            };
            if touched {
                workload.last_activity = now;
            }
        }
    }
}
