use tether_relay::config::RelayConfig;
use tether_relay::RelayServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = if let Ok(path) = std::env::var("TETHER_RELAY_CONFIG_PATH") {
        RelayConfig::from_toml(path)?
    } else {
        RelayConfig::from_env()?
    };

    let server = RelayServer::new(config)?;
    server.start().await?;

    Ok(())
}
