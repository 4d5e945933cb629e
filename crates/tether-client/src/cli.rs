//! CLI command definitions and argument parsing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use tether_core::http_relay::HttpRelay;

use crate::ops::{self, PairOutcome, SendOutcome};
use crate::output::{self, JsonResponse, OutputFormat};
use crate::{cache, ExitCode};

#[derive(Parser, Debug)]
#[command(name = "tether-client")]
#[command(version, about = "Tether Client CLI - pair with Hosts and send them commands")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Relay base URL
    #[arg(
        long,
        global = true,
        env = "TETHER_RELAY_URL",
        default_value = "http://127.0.0.1:7070"
    )]
    pub relay_url: String,

    /// Output format: table, json, quiet
    #[arg(long, global = true, default_value = "table")]
    pub output: OutputFormat,

    /// Session cache file (defaults to the user data directory)
    #[arg(long, global = true)]
    pub cache_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List online Hosts
    Hosts,

    /// Pair with a Host: shows the session code, prompts for the OTP
    Pair {
        /// Host to pair with
        host_id: String,

        /// Seconds to wait for the Host's verdict
        #[arg(long, default_value_t = 120)]
        deadline_secs: u64,
    },

    /// Send a command request to the paired Host
    Send {
        /// Command type (e.g. list-directory, chat-message)
        kind: String,

        /// JSON payload for the request
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 30)]
        deadline_secs: u64,
    },

    /// Show the cached session and the target Host's presence
    Status,
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<ExitCode> {
        let Cli {
            command,
            relay_url,
            output,
            cache_file,
            verbose: _,
        } = self;

        let store = Arc::new(HttpRelay::new(&relay_url)?);
        let cache_path = match cache_file {
            Some(path) => path,
            None => cache::default_path()
                .ok_or_else(|| anyhow::anyhow!("no user data directory for the session cache"))?,
        };

        match command {
            Commands::Hosts => hosts_cmd(store, output).await,
            Commands::Pair {
                host_id,
                deadline_secs,
            } => {
                pair_cmd(
                    store,
                    output,
                    &cache_path,
                    &host_id,
                    Duration::from_secs(deadline_secs),
                )
                .await
            }
            Commands::Send {
                kind,
                payload,
                deadline_secs,
            } => {
                send_cmd(
                    store,
                    output,
                    &cache_path,
                    &kind,
                    &payload,
                    Duration::from_secs(deadline_secs),
                )
                .await
            }
            Commands::Status => status_cmd(store, output, &cache_path).await,
        }
    }
}

async fn hosts_cmd(store: Arc<HttpRelay>, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let hosts = ops::list_hosts(store).await?;
    match format {
        OutputFormat::Table => {
            if hosts.is_empty() {
                println!("No Hosts online.");
            } else {
                println!("{}", output::hosts_table(&hosts));
            }
        }
        OutputFormat::Json => output::print_json(&JsonResponse::success(hosts)),
        OutputFormat::Quiet => {}
    }
    Ok(ExitCode::Success)
}

async fn pair_cmd(
    store: Arc<HttpRelay>,
    format: OutputFormat,
    cache_path: &Path,
    host_id: &str,
    deadline: Duration,
) -> anyhow::Result<ExitCode> {
    let attempt = ops::begin_pair(store, host_id).await?;
    println!("Session code: {}", attempt.code());
    println!("Read the OTP off the Host console and enter it below.");
    let otp = prompt_line("OTP: ")?;

    match attempt.finish(&otp, deadline).await? {
        PairOutcome::Authenticated { session } => {
            cache::save(cache_path, &session)?;
            match format {
                OutputFormat::Table => println!("Paired with {host_id}. Session cached."),
                OutputFormat::Json => {
                    output::print_json(&JsonResponse::success(serde_json::json!({
                        "hostId": host_id,
                        "state": "authenticated",
                    })))
                }
                OutputFormat::Quiet => {}
            }
            Ok(ExitCode::Success)
        }
        PairOutcome::Failed { reason } => {
            match format {
                OutputFormat::Json => output::print_json(&JsonResponse::error(&reason)),
                _ => eprintln!("Pairing failed: {reason}"),
            }
            Ok(ExitCode::AuthenticationFailed)
        }
        PairOutcome::TimedOut => {
            match format {
                OutputFormat::Json => {
                    output::print_json(&JsonResponse::error("no verdict before the deadline"))
                }
                _ => eprintln!("No verdict from the Host before the deadline."),
            }
            Ok(ExitCode::Timeout)
        }
    }
}

async fn send_cmd(
    store: Arc<HttpRelay>,
    format: OutputFormat,
    cache_path: &Path,
    kind: &str,
    payload_raw: &str,
    deadline: Duration,
) -> anyhow::Result<ExitCode> {
    let session = cache::load(cache_path)?;
    let host_id = match (&session.host_id, session.is_authenticated()) {
        (Some(host_id), true) => host_id.clone(),
        _ => {
            match format {
                OutputFormat::Json => output::print_json(&JsonResponse::error("not paired")),
                _ => eprintln!("Not paired. Run `tether-client pair <host-id>` first."),
            }
            return Ok(ExitCode::NotPaired);
        }
    };

    let payload: Value = serde_json::from_str(payload_raw)
        .map_err(|e| anyhow::anyhow!("payload is not valid JSON: {e}"))?;

    match ops::send(store, &host_id, kind, payload, deadline).await? {
        SendOutcome::Completed { response, .. } => {
            match format {
                OutputFormat::Table => println!("{}", serde_json::to_string_pretty(&response)?),
                OutputFormat::Json => output::print_json(&JsonResponse::success(response)),
                OutputFormat::Quiet => {}
            }
            Ok(ExitCode::Success)
        }
        SendOutcome::Failed { error, .. } => {
            match format {
                OutputFormat::Json => output::print_json(&JsonResponse::error(&error)),
                _ => eprintln!("Request failed: {error}"),
            }
            Ok(ExitCode::GeneralError)
        }
        SendOutcome::StillPending { client_id } => {
            // Not a protocol failure: the request stays pending and the
            // Host may still answer it.
            match format {
                OutputFormat::Json => {
                    output::print_json(&JsonResponse::success(serde_json::json!({
                        "clientId": client_id,
                        "state": "pending",
                    })))
                }
                _ => println!("Request {client_id} still pending at the deadline."),
            }
            Ok(ExitCode::Timeout)
        }
    }
}

async fn status_cmd(
    store: Arc<HttpRelay>,
    format: OutputFormat,
    cache_path: &Path,
) -> anyhow::Result<ExitCode> {
    let session = cache::load(cache_path)?;
    let report = ops::status(store, &session).await?;
    match format {
        OutputFormat::Table => println!("{}", output::status_table(&report)),
        OutputFormat::Json => output::print_json(&JsonResponse::success(report)),
        OutputFormat::Quiet => {}
    }
    Ok(ExitCode::Success)
}

fn prompt_line(prompt: &str) -> std::io::Result<String> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
