//! Session cache: the client's durable memory of its pairing.
//!
//! One JSON file under the user data directory holding the last
//! `ClientSession`. Loaded at startup, rewritten whenever the session
//! transitions.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use tether_core::client::ClientSession;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Default cache file location, `<user data dir>/session.json`.
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tether-client")
        .map(|dirs| dirs.data_dir().join("session.json"))
}

/// Load the cached session. A missing file is a fresh, disconnected
/// session; a file that exists but does not parse is an error, so the
/// user sees the problem instead of silently losing a credential.
pub fn load(path: &Path) -> Result<ClientSession, CacheError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no session cache, starting fresh");
            Ok(ClientSession::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Persist the session, creating the parent directory on first save.
pub fn save(path: &Path, session: &ClientSession) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(session)?;
    std::fs::write(path, raw)?;
    Ok(())
}
