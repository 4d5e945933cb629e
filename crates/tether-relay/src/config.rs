use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,

    // Request handling
    pub max_body_bytes: usize,
    pub max_wait_ms: u64,

    // Background sweep
    pub sweep_interval_secs: u64,
    /// Demote online hosts silent for longer than this. 0 disables.
    pub host_stale_after_secs: u64,
    /// Evict terminal requests older than this. 0 keeps them forever.
    pub request_retention_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7070".parse().unwrap(),
            max_body_bytes: 64 * 1024, // 64KB
            max_wait_ms: 30_000,
            sweep_interval_secs: 30,
            host_stale_after_secs: 90,
            request_retention_secs: 86_400, // one day
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TETHER_RELAY_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }

        if let Ok(bytes) = std::env::var("TETHER_RELAY_MAX_BODY_BYTES") {
            config.max_body_bytes = bytes.parse()?;
        }

        if let Ok(ms) = std::env::var("TETHER_RELAY_MAX_WAIT_MS") {
            config.max_wait_ms = ms.parse()?;
        }

        if let Ok(secs) = std::env::var("TETHER_RELAY_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = secs.parse()?;
        }

        if let Ok(secs) = std::env::var("TETHER_RELAY_HOST_STALE_AFTER_SECS") {
            config.host_stale_after_secs = secs.parse()?;
        }

        if let Ok(secs) = std::env::var("TETHER_RELAY_REQUEST_RETENTION_SECS") {
            config.request_retention_secs = secs.parse()?;
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be > 0");
        }

        if self.max_wait_ms == 0 {
            anyhow::bail!("max_wait_ms must be > 0");
        }

        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be > 0");
        }

        Ok(())
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn host_stale_after(&self) -> Duration {
        Duration::from_secs(self.host_stale_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        RelayConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let config = RelayConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RelayConfig =
            toml::from_str("bind_addr = \"127.0.0.1:9000\"\nhost_stale_after_secs = 0\n").unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.host_stale_after_secs, 0);
        assert_eq!(config.max_wait_ms, RelayConfig::default().max_wait_ms);
    }
}
