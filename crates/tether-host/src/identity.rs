use std::path::Path;
use thiserror::Error;
use tracing::info;

use tether_core::ident::generate_host_id;

const ID_FILE: &str = "host_id";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity storage failed: {0}")]
    Storage(#[from] std::io::Error),
    #[error("stored host id is malformed: {0:?}")]
    Malformed(String),
}

/// Load the stable host id from the state directory, generating and
/// persisting a fresh one on first run.
///
/// A malformed id file is an error, not a trigger for regeneration:
/// silently minting a new id would orphan the presence record the old
/// one owns.
pub fn load_or_generate(state_dir: &Path) -> Result<String, IdentityError> {
    let path = state_dir.join(ID_FILE);

    if path.exists() {
        let host_id = std::fs::read_to_string(&path)?.trim().to_string();
        validate(&host_id)?;
        info!(host_id = %host_id, "loaded existing host identity");
        return Ok(host_id);
    }

    std::fs::create_dir_all(state_dir)?;
    let host_id = generate_host_id();
    std::fs::write(&path, &host_id)?;
    info!(host_id = %host_id, "generated new host identity");
    Ok(host_id)
}

fn validate(host_id: &str) -> Result<(), IdentityError> {
    let suffix = host_id
        .strip_prefix("host-")
        .ok_or_else(|| IdentityError::Malformed(host_id.to_string()))?;
    if suffix.len() != 16 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IdentityError::Malformed(host_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_then_reloads_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_generate(dir.path()).unwrap();
        let second = load_or_generate(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("host-"));
        assert_eq!(first.len(), "host-".len() + 16);
    }

    #[test]
    fn test_creates_missing_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("state");
        let host_id = load_or_generate(&nested).unwrap();
        assert!(nested.join("host_id").exists());
        assert!(host_id.starts_with("host-"));
    }

    #[test]
    fn test_malformed_id_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("host_id"), "not-a-host-id").unwrap();
        let err = load_or_generate(dir.path()).unwrap_err();
        assert!(matches!(err, IdentityError::Malformed(_)));
    }

    #[test]
    fn test_trailing_newline_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("host_id"), "host-0123456789abcdef\n").unwrap();
        let host_id = load_or_generate(dir.path()).unwrap();
        assert_eq!(host_id, "host-0123456789abcdef");
    }
}
