//! Correlated request/response over a shared polled store.
//!
//! The channel is the one reusable delivery mechanism in the protocol:
//! pairing, directory listing, and chat all flow through it as
//! different `type` values. A client submits under a correlation id it
//! never reuses, a Host writes exactly one terminal state, and the
//! client observes that state by polling. "Still pending" is a normal
//! intermediate state, never an error; deadlines belong to the caller.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::store::{RelayStore, StoreError};
use crate::types::{now_ms, CommandRequest};

/// Default pacing between polls in `await_response`.
pub const POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Cap on the Host-side pending queue read.
pub const PENDING_PAGE_CAP: usize = 50;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from channel operations.
#[derive(Debug, Error, Clone)]
pub enum ChannelError {
    /// The correlation id was used before. A caller bug: retries must
    /// mint a fresh id, never replay one.
    #[error("correlation id already in use: {0}")]
    DuplicateCorrelationId(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Command Channel
// ============================================================================

/// Submits, observes, and terminates Command Requests over `S`.
pub struct CommandChannel<S: RelayStore> {
    store: Arc<S>,
    poll_interval: Duration,
}

impl<S: RelayStore> CommandChannel<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_poll_interval(store, POLL_INTERVAL)
    }

    pub fn with_poll_interval(store: Arc<S>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Create a pending Command Request under `client_id`.
    ///
    /// Rejects a reused correlation id; a retry is a new logical
    /// attempt and must carry a new id.
    pub async fn submit(
        &self,
        host_id: &str,
        kind: &str,
        payload: Value,
        client_id: &str,
    ) -> Result<CommandRequest, ChannelError> {
        let request = CommandRequest::pending(client_id, host_id, kind, payload, now_ms());
        match self.store.insert_request(request.clone()).await {
            Ok(()) => {
                info!(client_id, host_id, kind, "request submitted");
                Ok(request)
            }
            Err(StoreError::AlreadyExists(id)) => {
                Err(ChannelError::DuplicateCorrelationId(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read the current state of a request without waiting.
    pub async fn get(&self, client_id: &str) -> Result<Option<CommandRequest>, ChannelError> {
        Ok(self.store.get_request(client_id).await?)
    }

    /// Poll until the request reaches a terminal state and return it.
    ///
    /// The store is offered the poll interval as a long-poll hint;
    /// backends that cannot hold a read fall back to client-side
    /// pacing. This never times out on its own. Callers that want a
    /// deadline wrap it in `tokio::time::timeout` and treat expiry as
    /// "still pending", not as a protocol failure.
    pub async fn await_response(&self, client_id: &str) -> Result<CommandRequest, ChannelError> {
        loop {
            let started = Instant::now();
            match self.store.get_request_wait(client_id, self.poll_interval).await? {
                Some(request) if request.is_terminal() => {
                    debug!(client_id, status = ?request.status, "request reached terminal state");
                    return Ok(request);
                }
                Some(_) => {}
                None => {
                    return Err(StoreError::NotFound(format!("request {client_id}")).into());
                }
            }
            // Pace the loop only by whatever the store did not already
            // absorb holding the read.
            let elapsed = started.elapsed();
            if elapsed < self.poll_interval {
                sleep(self.poll_interval - elapsed).await;
            }
        }
    }

    /// Host-side work queue: pending requests targeting `host_id`,
    /// oldest first, capped at [`PENDING_PAGE_CAP`].
    pub async fn pending_for(&self, host_id: &str) -> Result<Vec<CommandRequest>, ChannelError> {
        Ok(self.store.pending_for(host_id, PENDING_PAGE_CAP).await?)
    }

    /// Like [`Self::pending_for`], but offers `wait` as a long-poll
    /// hint so an empty queue can block server-side instead of
    /// hammering the store.
    pub async fn pending_for_wait(
        &self,
        host_id: &str,
        wait: Duration,
    ) -> Result<Vec<CommandRequest>, ChannelError> {
        Ok(self
            .store
            .pending_for_wait(host_id, PENDING_PAGE_CAP, wait)
            .await?)
    }

    /// Terminal write: complete with a response payload. Returns
    /// whether this call won the write; a `false` means the request was
    /// already terminal and the payload was discarded.
    pub async fn complete(&self, client_id: &str, response: Value) -> Result<bool, ChannelError> {
        let applied = self.store.complete_request(client_id, response).await?;
        info!(client_id, applied, "request completed");
        Ok(applied)
    }

    /// Terminal write: fail with an error message. Same first-write-
    /// wins contract as [`Self::complete`].
    pub async fn fail(&self, client_id: &str, error: &str) -> Result<bool, ChannelError> {
        let applied = self.store.fail_request(client_id, error).await?;
        info!(client_id, applied, error, "request failed");
        Ok(applied)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRelay;
    use crate::types::RequestStatus;

    fn channel() -> (CommandChannel<MemoryRelay>, Arc<MemoryRelay>) {
        let store = MemoryRelay::new_shared();
        (
            CommandChannel::with_poll_interval(store.clone(), Duration::from_millis(10)),
            store,
        )
    }

    #[tokio::test]
    async fn test_submit_creates_pending_request() {
        let (channel, store) = channel();
        let request = channel
            .submit(
                "host-1",
                "authenticate",
                serde_json::json!({"sessionCode": "ABC123", "otp": "482913"}),
                "auth-1",
            )
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Pending);

        let stored = store.get_request("auth-1").await.unwrap().unwrap();
        assert_eq!(stored.host_id, "host-1");
        assert_eq!(stored.kind, "authenticate");
    }

    #[tokio::test]
    async fn test_submit_rejects_reused_correlation_id() {
        let (channel, _store) = channel();
        channel
            .submit("host-1", "chat-message", serde_json::json!({}), "chat-1")
            .await
            .unwrap();

        let err = channel
            .submit("host-1", "chat-message", serde_json::json!({}), "chat-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::DuplicateCorrelationId(id) if id == "chat-1"));
    }

    #[tokio::test]
    async fn test_await_response_resolves_on_completion() {
        let (channel, store) = channel();
        channel
            .submit("host-1", "list-directory", serde_json::json!({"path": "/"}), "ls-1")
            .await
            .unwrap();

        // Terminal write lands while the client is polling.
        let writer = store.clone();
        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            writer
                .complete_request("ls-1", serde_json::json!({"entries": []}))
                .await
                .unwrap();
        });

        let request = channel.await_response("ls-1").await.unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.response, Some(serde_json::json!({"entries": []})));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_await_response_carries_failure_as_data() {
        let (channel, _store) = channel();
        channel
            .submit("host-1", "authenticate", serde_json::json!({}), "auth-1")
            .await
            .unwrap();
        channel.fail("auth-1", "OTP mismatch").await.unwrap();

        let request = channel.await_response("auth-1").await.unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        assert_eq!(request.error.as_deref(), Some("OTP mismatch"));
    }

    #[tokio::test]
    async fn test_await_response_unknown_id_errors() {
        let (channel, _store) = channel();
        let err = channel.await_response("auth-none").await.unwrap_err();
        assert!(matches!(err, ChannelError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_caller_deadline_sees_still_pending() {
        let (channel, _store) = channel();
        channel
            .submit("host-1", "chat-message", serde_json::json!({}), "chat-1")
            .await
            .unwrap();

        // Nobody answers; the caller's own deadline fires and the
        // request is simply still pending.
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), channel.await_response("chat-1")).await;
        assert!(outcome.is_err());

        let request = channel.get("chat-1").await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_terminal_writes_report_first_writer() {
        let (channel, _store) = channel();
        channel
            .submit("host-1", "authenticate", serde_json::json!({}), "auth-1")
            .await
            .unwrap();

        assert!(channel
            .complete("auth-1", serde_json::json!({"credential": "c"}))
            .await
            .unwrap());
        assert!(!channel.fail("auth-1", "late").await.unwrap());
        assert!(!channel
            .complete("auth-1", serde_json::json!({"credential": "other"}))
            .await
            .unwrap());

        let request = channel.get("auth-1").await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.response, Some(serde_json::json!({"credential": "c"})));
    }

    #[tokio::test]
    async fn test_pending_for_is_the_host_work_queue() {
        let (channel, _store) = channel();
        channel
            .submit("host-1", "chat-message", serde_json::json!({}), "chat-1")
            .await
            .unwrap();
        channel
            .submit("host-2", "chat-message", serde_json::json!({}), "chat-2")
            .await
            .unwrap();

        let queue = channel.pending_for("host-1").await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].client_id, "chat-1");

        channel.complete("chat-1", serde_json::json!({})).await.unwrap();
        assert!(channel.pending_for("host-1").await.unwrap().is_empty());
    }
}
