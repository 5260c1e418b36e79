//! # Initialization
//!
//! Process setup before the watch loop starts: crypto provider, logging,
//! metrics, the HTTP server, the Kubernetes client and the shutdown signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use kube::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::observability;

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    /// Cancelled on SIGINT or SIGTERM
    pub shutdown: CancellationToken,
    pub server_handle: JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let controller_config = ControllerConfig::from_env();
    let server_config = ServerConfig::from_env();
    observability::logging::init(&controller_config);

    info!("Starting Virtual Cluster Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let shutdown = CancellationToken::new();
    let server_state = Arc::new(ServerState::default());

    let server_handle = {
        let state = Arc::clone(&server_state);
        let token = shutdown.clone();
        let port = server_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, token).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    spawn_signal_handler(Arc::clone(&server_state), shutdown.clone());

    let client = Client::try_default().await?;
    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        controller_config,
        shutdown.clone(),
    ));

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        shutdown,
        server_handle,
    })
}

/// Mark the server unready and cancel in-flight passes on SIGINT or SIGTERM
fn spawn_signal_handler(server_state: Arc<ServerState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        server_state.set_ready(false);
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let start = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
