use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tether_core::presence::PresenceTracker;
use tether_core::store::{MemoryRelay, RelayStore};
use tether_core::types::{now_ms, HostStatus};

use crate::api::{self, AppState};
use crate::config::RelayConfig;
use crate::metrics::RelayMetrics;
use crate::wakeup::Wakeups;

pub struct RelayServer {
    config: RelayConfig,
    store: Arc<MemoryRelay>,
    wakeups: Wakeups,
    metrics: Arc<RelayMetrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store = MemoryRelay::new_shared();
        let wakeups = Wakeups::new();
        let metrics = Arc::new(RelayMetrics::new()?);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            wakeups,
            metrics,
            shutdown_tx,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            wakeups: self.wakeups.clone(),
            metrics: Arc::clone(&self.metrics),
            config: self.config.clone(),
            shutdown: self.shutdown_tx.subscribe(),
            started: Instant::now(),
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        // Start sweep task
        tokio::spawn(Self::sweep_task(
            self.store.clone(),
            self.wakeups.clone(),
            self.config.clone(),
            Arc::clone(&self.metrics),
            self.shutdown_tx.subscribe(),
        ));

        let app = build_router(self.app_state(), self.config.max_body_bytes);
        let shutdown_rx = self.shutdown_tx.subscribe();

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "tether-relay listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(Self::shutdown_signal(shutdown_rx))
            .await?;

        Ok(())
    }

    /// Interval-driven retention pass: demote silent hosts, delete
    /// expired sessions, evict long-terminal requests.
    async fn sweep_task(
        store: Arc<MemoryRelay>,
        wakeups: Wakeups,
        config: RelayConfig,
        metrics: Arc<RelayMetrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let presence = PresenceTracker::new(store.clone());
        let mut interval = tokio::time::interval(config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = now_ms();

                    let mut demoted = 0;
                    if config.host_stale_after_secs > 0 {
                        match presence.sweep_stale(now, config.host_stale_after()).await {
                            Ok(count) => demoted = count,
                            Err(e) => warn!(error = %e, "stale host sweep failed"),
                        }
                    }

                    let expired = store.delete_expired_sessions(now).await;

                    let mut evicted = 0;
                    if config.request_retention_secs > 0 {
                        let cutoff = now.saturating_sub(config.request_retention_secs * 1000);
                        let ids = store.evict_terminal_requests(cutoff).await;
                        evicted = ids.len();
                        for id in &ids {
                            wakeups.forget_request(id);
                        }
                    }

                    let swept = demoted + expired + evicted;
                    if swept > 0 {
                        metrics.records_swept.inc_by(swept as f64);
                        info!(demoted, expired, evicted, "sweep pass removed records");
                    }

                    if let Ok(online) = store.hosts_with_status(HostStatus::Online, usize::MAX).await {
                        metrics.online_hosts.set(online.len() as f64);
                    }
                    if let Ok(open) = store.open_sessions(usize::MAX).await {
                        metrics.open_sessions.set(open.len() as f64);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, starting graceful shutdown");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown requested");
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/hosts", get(api::list_hosts))
        .route(
            "/v1/hosts/:host_id",
            put(api::put_host).patch(api::patch_host).get(api::get_host),
        )
        .route("/v1/hosts/:host_id/requests", get(api::host_requests))
        .route("/v1/sessions", post(api::post_session).get(api::list_sessions))
        .route("/v1/sessions/by-code/:code", get(api::get_session_by_code))
        .route("/v1/sessions/:session_id", get(api::get_session))
        .route("/v1/sessions/:session_id/consume", post(api::consume_session))
        .route("/v1/requests", post(api::post_request))
        .route("/v1/requests/:client_id", get(api::get_request))
        .route("/v1/requests/:client_id/complete", post(api::complete_request))
        .route("/v1/requests/:client_id/fail", post(api::fail_request))
        .route("/health", get(api::get_health))
        .route("/metrics", get(api::get_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}
