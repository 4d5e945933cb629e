//! Shared data model for the relay protocol.
//!
//! Everything here crosses a process boundary as JSON, so field names
//! follow the wire convention (camelCase).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Advertised liveness of a Host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Online => write!(f, "online"),
            HostStatus::Offline => write!(f, "offline"),
        }
    }
}

/// One externally-running job a Host is currently serving.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub path: String,
    pub port: u16,
    pub pid: u32,
    /// Unix milliseconds when the job started.
    pub started_at: u64,
    /// Unix milliseconds of the last observed activity.
    pub last_activity: u64,
}

/// Presence record for one Host, at most one per `host_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub host_id: String,
    pub status: HostStatus,
    pub active_workloads: Vec<Workload>,
    pub version: String,
    pub platform: String,
    /// Unix milliseconds of the last announce or heartbeat.
    pub last_seen: u64,
}

/// Partial update to a Host record. Absent fields keep their stored value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<HostStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_workloads: Option<Vec<Workload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

/// One pairing attempt: a display code plus a single-use OTP secret.
///
/// The OTP is stored as the plain secret string so the Host console can
/// display it to the operator; the short expiry and single consume bound
/// its lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingSession {
    pub session_id: String,
    /// Human-shareable code, shown to the client after `start_session`.
    pub code: String,
    /// OTP secret, delivered out-of-band via the Host console only.
    pub otp: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub consumed: bool,
}

impl PairingSession {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Lifecycle of a Command Request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

/// One client→Host command with its eventual single reply.
///
/// `client_id` is the correlation token: chosen by the client, unique per
/// logical attempt, never reused. Exactly one terminal write is permitted;
/// after that the record never changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub client_id: String,
    pub host_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: u64,
}

impl CommandRequest {
    /// Build a fresh pending request.
    pub fn pending(
        client_id: impl Into<String>,
        host_id: impl Into<String>,
        kind: impl Into<String>,
        payload: Value,
        now_ms: u64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            host_id: host_id.into(),
            kind: kind.into(),
            payload,
            status: RequestStatus::Pending,
            response: None,
            error: None,
            created_at: now_ms,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RequestStatus::Completed | RequestStatus::Failed)
    }
}

/// Current wall-clock time as Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_field_names_are_camel_case() {
        let req = CommandRequest::pending(
            "auth-1700000000-x7q2z1",
            "host-1",
            "authenticate",
            serde_json::json!({"sessionCode": "ABC123", "otp": "482913"}),
            1_700_000_000_000,
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["clientId"], "auth-1700000000-x7q2z1");
        assert_eq!(v["hostId"], "host-1");
        assert_eq!(v["type"], "authenticate");
        assert_eq!(v["status"], "pending");
        assert_eq!(v["createdAt"], 1_700_000_000_000u64);
        // Terminal fields are absent until a terminal write lands.
        assert!(v.get("response").is_none());
        assert!(v.get("error").is_none());
    }

    #[test]
    fn host_record_round_trips() {
        let rec = HostRecord {
            host_id: "host-1".into(),
            status: HostStatus::Online,
            active_workloads: vec![Workload {
                path: "/srv/app".into(),
                port: 3000,
                pid: 4242,
                started_at: 1_700_000_000_000,
                last_activity: 1_700_000_001_000,
            }],
            version: "0.1.0".into(),
            platform: "linux".into(),
            last_seen: 1_700_000_002_000,
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"activeWorkloads\""));
        assert!(json.contains("\"lastSeen\""));
        let back: HostRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host_id, "host-1");
        assert_eq!(back.status, HostStatus::Online);
        assert_eq!(back.active_workloads.len(), 1);
        assert_eq!(back.active_workloads[0].port, 3000);
    }

    #[test]
    fn host_patch_omits_absent_fields() {
        let patch = HostPatch {
            status: Some(HostStatus::Online),
            active_workloads: None,
            last_seen: Some(5),
        };
        let v = serde_json::to_value(&patch).unwrap();
        assert_eq!(v["status"], "online");
        assert!(v.get("activeWorkloads").is_none());

        let parsed: HostPatch = serde_json::from_str("{}").unwrap();
        assert!(parsed.status.is_none());
        assert!(parsed.active_workloads.is_none());
        assert!(parsed.last_seen.is_none());
    }

    #[test]
    fn session_expiry_is_inclusive_at_the_boundary() {
        let s = PairingSession {
            session_id: "s-1".into(),
            code: "ABC123".into(),
            otp: "482913".into(),
            created_at: 0,
            expires_at: 1000,
            consumed: false,
        };
        assert!(!s.is_expired(999));
        assert!(s.is_expired(1000));
        assert!(s.is_expired(1001));
    }
}
