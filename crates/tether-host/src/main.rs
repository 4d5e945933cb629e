use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use tether_core::http_relay::HttpRelay;
use tether_host::agent::{workloads_from_config, HostAgent};
use tether_host::config::HostConfig;
use tether_host::identity;

#[derive(Parser)]
#[command(name = "tether-host")]
#[command(about = "Tether Host agent - presence, pairing console, and request servicing")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay base URL (overrides the config file)
    #[arg(short, long)]
    relay_url: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "tether_host={},tether_core={}",
            args.log_level, args.log_level
        ))
        .init();

    info!("Starting tether-host");

    let mut config = if let Some(config_path) = &args.config {
        HostConfig::load_from_file(config_path)?
    } else {
        HostConfig::load_from_env()
    };
    if let Some(relay_url) = args.relay_url {
        config.relay_url = relay_url;
    }

    let state_dir = match &config.state_dir {
        Some(dir) => dir.clone(),
        None => directories::ProjectDirs::from("", "", "tether-host")
            .ok_or_else(|| anyhow::anyhow!("no home directory for the identity file"))?
            .data_dir()
            .to_path_buf(),
    };
    let host_id = identity::load_or_generate(&state_dir)?;
    info!(%host_id, relay_url = %config.relay_url, "identity loaded");

    let store = Arc::new(HttpRelay::new(&config.relay_url)?);
    let agent = Arc::new(HostAgent::new(
        store,
        host_id,
        workloads_from_config(&config.workloads),
    ));

    agent
        .announce_online(env!("CARGO_PKG_VERSION"), std::env::consts::OS)
        .await?;
    info!("announced online");

    // Liveness beats on their own cadence, independent of the work loop.
    let heartbeat = {
        let agent = agent.clone();
        let period = config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = agent.beat().await {
                    warn!(error = %e, "heartbeat failed");
                }
            }
        })
    };

    // Console echo of open pairing sessions: the operator reads the OTP
    // here and relays it to the client out of band.
    let console = {
        let agent = agent.clone();
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = agent.print_new_sessions(&mut seen).await {
                    warn!(error = %e, "session listing failed");
                }
            }
        })
    };

    let poll_wait = config.poll_wait();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            serviced = agent.service_once(poll_wait) => {
                match serviced {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "serviced requests"),
                    Err(e) => {
                        warn!(error = %e, "work loop error, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    heartbeat.abort();
    console.abort();
    agent.shutdown().await?;
    info!("tether-host stopped");

    Ok(())
}
