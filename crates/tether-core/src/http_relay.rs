#![cfg(feature = "http-relay")]

//! `RelayStore` over the relay service's JSON API.
//!
//! Same contract as `MemoryRelay`, different medium: conditional writes
//! become POSTs returning an applied flag, and the wait-hinted reads
//! turn into real server-side long-polls via `?wait_ms=`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::store::{RelayStore, StoreError};
use crate::types::{CommandRequest, HostPatch, HostRecord, HostStatus, PairingSession};

#[derive(Clone)]
pub struct HttpRelay {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompleteBody {
    response: Value,
}

#[derive(Serialize)]
struct FailBody {
    error: String,
}

#[derive(serde::Deserialize)]
struct AppliedBody {
    applied: bool,
}

#[derive(serde::Deserialize)]
struct ConsumedBody {
    consumed: bool,
}

fn http_err(e: reqwest::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(http_err)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn unexpected(resp: reqwest::Response) -> StoreError {
        StoreError::Backend(format!(
            "status={} body={:?}",
            resp.status(),
            resp.text().await.ok()
        ))
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, StoreError> {
        resp.json::<T>()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// GET that treats 404 as absence.
    async fn get_opt<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>, StoreError> {
        let resp = self.client.get(url).send().await.map_err(http_err)?;
        match resp.status() {
            StatusCode::OK => Ok(Some(Self::decode(resp).await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(resp).await),
        }
    }

    async fn get_list<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, StoreError> {
        let resp = self.client.get(url).send().await.map_err(http_err)?;
        match resp.status() {
            StatusCode::OK => Self::decode(resp).await,
            _ => Err(Self::unexpected(resp).await),
        }
    }
}

#[async_trait]
impl RelayStore for HttpRelay {
    // -------------------------------------------------------------------------
    // Host Records
    // -------------------------------------------------------------------------

    async fn put_host(&self, record: HostRecord) -> Result<(), StoreError> {
        let url = self.url(&format!("/v1/hosts/{}", record.host_id));
        let resp = self
            .client
            .put(url)
            .json(&record)
            .send()
            .await
            .map_err(http_err)?;
        match resp.status() {
            StatusCode::NO_CONTENT => Ok(()),
            _ => Err(Self::unexpected(resp).await),
        }
    }

    async fn patch_host(&self, host_id: &str, patch: HostPatch) -> Result<bool, StoreError> {
        let url = self.url(&format!("/v1/hosts/{host_id}"));
        let resp = self
            .client
            .patch(url)
            .json(&patch)
            .send()
            .await
            .map_err(http_err)?;
        match resp.status() {
            StatusCode::OK => Ok(Self::decode::<AppliedBody>(resp).await?.applied),
            _ => Err(Self::unexpected(resp).await),
        }
    }

    async fn get_host(&self, host_id: &str) -> Result<Option<HostRecord>, StoreError> {
        self.get_opt(self.url(&format!("/v1/hosts/{host_id}"))).await
    }

    async fn hosts_with_status(
        &self,
        status: HostStatus,
        limit: usize,
    ) -> Result<Vec<HostRecord>, StoreError> {
        self.get_list(self.url(&format!("/v1/hosts?status={status}&limit={limit}")))
            .await
    }

    // -------------------------------------------------------------------------
    // Pairing Sessions
    // -------------------------------------------------------------------------

    async fn insert_session(&self, session: PairingSession) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.url("/v1/sessions"))
            .json(&session)
            .send()
            .await
            .map_err(http_err)?;
        match resp.status() {
            StatusCode::CREATED => Ok(()),
            StatusCode::CONFLICT => Err(StoreError::AlreadyExists(session.session_id)),
            _ => Err(Self::unexpected(resp).await),
        }
    }

    async fn session_by_id(&self, session_id: &str) -> Result<Option<PairingSession>, StoreError> {
        self.get_opt(self.url(&format!("/v1/sessions/{session_id}")))
            .await
    }

    async fn session_by_code(&self, code: &str) -> Result<Option<PairingSession>, StoreError> {
        self.get_opt(self.url(&format!("/v1/sessions/by-code/{code}")))
            .await
    }

    async fn consume_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let url = self.url(&format!("/v1/sessions/{session_id}/consume"));
        let resp = self.client.post(url).send().await.map_err(http_err)?;
        match resp.status() {
            StatusCode::OK => Ok(Self::decode::<ConsumedBody>(resp).await?.consumed),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(format!("session {session_id}"))),
            _ => Err(Self::unexpected(resp).await),
        }
    }

    async fn open_sessions(&self, limit: usize) -> Result<Vec<PairingSession>, StoreError> {
        self.get_list(self.url(&format!("/v1/sessions?open=true&limit={limit}")))
            .await
    }

    // -------------------------------------------------------------------------
    // Command Requests
    // -------------------------------------------------------------------------

    async fn insert_request(&self, request: CommandRequest) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.url("/v1/requests"))
            .json(&request)
            .send()
            .await
            .map_err(http_err)?;
        match resp.status() {
            StatusCode::CREATED => Ok(()),
            StatusCode::CONFLICT => Err(StoreError::AlreadyExists(request.client_id)),
            _ => Err(Self::unexpected(resp).await),
        }
    }

    async fn get_request(&self, client_id: &str) -> Result<Option<CommandRequest>, StoreError> {
        self.get_opt(self.url(&format!("/v1/requests/{client_id}")))
            .await
    }

    /// Long-poll: the relay holds a pending request until a terminal
    /// write lands or the wait expires, then returns the current state.
    async fn get_request_wait(
        &self,
        client_id: &str,
        wait: Duration,
    ) -> Result<Option<CommandRequest>, StoreError> {
        self.get_opt(self.url(&format!(
            "/v1/requests/{client_id}?wait_ms={}",
            wait.as_millis()
        )))
        .await
    }

    async fn pending_for(
        &self,
        host_id: &str,
        limit: usize,
    ) -> Result<Vec<CommandRequest>, StoreError> {
        self.get_list(self.url(&format!("/v1/hosts/{host_id}/requests?limit={limit}")))
            .await
    }

    /// Long-poll: an empty work queue blocks server-side until a submit
    /// lands or the wait expires.
    async fn pending_for_wait(
        &self,
        host_id: &str,
        limit: usize,
        wait: Duration,
    ) -> Result<Vec<CommandRequest>, StoreError> {
        self.get_list(self.url(&format!(
            "/v1/hosts/{host_id}/requests?limit={limit}&wait_ms={}",
            wait.as_millis()
        )))
        .await
    }

    async fn complete_request(
        &self,
        client_id: &str,
        response: Value,
    ) -> Result<bool, StoreError> {
        let url = self.url(&format!("/v1/requests/{client_id}/complete"));
        let resp = self
            .client
            .post(url)
            .json(&CompleteBody { response })
            .send()
            .await
            .map_err(http_err)?;
        match resp.status() {
            StatusCode::OK => Ok(Self::decode::<AppliedBody>(resp).await?.applied),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(format!("request {client_id}"))),
            _ => Err(Self::unexpected(resp).await),
        }
    }

    async fn fail_request(&self, client_id: &str, error: &str) -> Result<bool, StoreError> {
        let url = self.url(&format!("/v1/requests/{client_id}/fail"));
        let resp = self
            .client
            .post(url)
            .json(&FailBody {
                error: error.to_string(),
            })
            .send()
            .await
            .map_err(http_err)?;
        match resp.status() {
            StatusCode::OK => Ok(Self::decode::<AppliedBody>(resp).await?.applied),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(format!("request {client_id}"))),
            _ => Err(Self::unexpected(resp).await),
        }
    }
}
