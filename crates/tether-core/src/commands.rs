//! Command kinds and their typed payloads.
//!
//! The channel carries opaque `serde_json::Value` payloads; this module
//! is where the known `type` values get shape. `authenticate` is the
//! pairing handshake; `list-directory` and `chat-message` are the
//! built-in example commands the Host agent answers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pairing handshake. Payload: [`AuthenticateRequest`]; successful
/// response: [`AuthenticateGrant`].
pub const AUTHENTICATE: &str = "authenticate";
/// Directory listing. Payload: [`ListDirectoryRequest`]; response:
/// [`ListDirectoryResponse`].
pub const LIST_DIRECTORY: &str = "list-directory";
/// Chat delivery. Payload: [`ChatMessage`]; response: [`ChatAck`].
pub const CHAT_MESSAGE: &str = "chat-message";

/// Serialize a typed payload into the wire `Value`.
pub fn to_payload<T: Serialize>(payload: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(payload)
}

/// Deserialize a wire `Value` into a typed payload.
pub fn from_payload<T: DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value.clone())
}

// ----------------------------------------------------------------------------
// authenticate
// ----------------------------------------------------------------------------

/// What the client bundles for redemption: the session's display code
/// plus the OTP the operator read off the Host console.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    pub session_code: String,
    pub otp: String,
}

/// Successful pairing outcome: the durable bearer credential.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateGrant {
    pub credential: String,
}

// ----------------------------------------------------------------------------
// list-directory
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDirectoryRequest {
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDirectoryResponse {
    pub path: String,
    pub entries: Vec<DirectoryEntry>,
}

// ----------------------------------------------------------------------------
// chat-message
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub from: String,
    pub text: String,
    /// Unix milliseconds at the sender.
    pub sent_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAck {
    /// Unix milliseconds at the Host.
    pub delivered_at: u64,
}
