use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub relay_url: String,

    /// Where the stable host id lives. Resolved to the platform data
    /// directory when unset.
    pub state_dir: Option<PathBuf>,

    // Presence
    pub heartbeat_interval_secs: u64,

    // Work loop
    pub poll_wait_ms: u64,

    /// Jobs this host advertises in its presence record.
    pub workloads: Vec<WorkloadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub path: String,
    pub port: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:7070".to_string(),
            state_dir: None,
            heartbeat_interval_secs: 15,
            poll_wait_ms: 25_000,
            workloads: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(e.to_string()))?;

        let config: HostConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("TETHER_HOST_RELAY_URL") {
            config.relay_url = url;
        }
        if let Ok(dir) = std::env::var("TETHER_HOST_STATE_DIR") {
            config.state_dir = Some(PathBuf::from(dir));
        }
        if let Ok(secs) = std::env::var("TETHER_HOST_HEARTBEAT_SECS") {
            if let Ok(value) = secs.parse::<u64>() {
                config.heartbeat_interval_secs = value;
            }
        }
        if let Ok(ms) = std::env::var("TETHER_HOST_POLL_WAIT_MS") {
            if let Ok(value) = ms.parse::<u64>() {
                config.poll_wait_ms = value;
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "relay_url must not be empty".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.poll_wait_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_wait_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        HostConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let config = HostConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_with_workloads() {
        let config: HostConfig = toml::from_str(
            r#"
relay_url = "http://relay.example:7070"

[[workloads]]
path = "/srv/app"
port = 8443
"#,
        )
        .unwrap();
        assert_eq!(config.relay_url, "http://relay.example:7070");
        assert_eq!(config.workloads.len(), 1);
        assert_eq!(config.workloads[0].port, 8443);
        assert_eq!(
            config.heartbeat_interval_secs,
            HostConfig::default().heartbeat_interval_secs
        );
    }
}
