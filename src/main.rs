//! # Virtual Cluster Operator
//!
//! Watches `VirtualCluster` resources and reconciles each into a running
//! nested control plane. See the library crate for the moving parts.

use anyhow::Result;
use tracing::{error, info};

use virtual_cluster_operator::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let result = run_watch_loop(
        init.client.clone(),
        init.reconciler.clone(),
        init.shutdown.clone(),
    )
    .await;

    // The watch loop also ends when the stream gives up; stop the server either way
    init.shutdown.cancel();
    if let Err(e) = init.server_handle.await {
        error!("HTTP server task failed: {}", e);
    }
    info!("Shutdown complete");
    result
}
