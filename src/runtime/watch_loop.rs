//! # Watch Loop
//!
//! Watches `VirtualCluster` resources and the workloads they own, and runs a
//! pass whenever one of them changes. The stream is restarted after errors
//! until shutdown is requested.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::Api;
use kube::Client;
use kube_runtime::controller::{self, Action};
use kube_runtime::{watcher, Controller};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::controller::reconciler::{self, reconcile, Reconciler, ReconcilerError};
use crate::crd::VirtualCluster;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};

/// Run the controller until `shutdown` is cancelled
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error> {
    let config = reconciler.config().clone();
    let backoff_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));
    let clusters: Api<VirtualCluster> = Api::all(client.clone());

    while !shutdown.is_cancelled() {
        let watch_span = tracing::info_span!("controller.watch", operation = "watch_loop");
        info!("Starting controller watch loop...");

        let backoff = Arc::clone(&backoff_ms);
        let filter_config = config.clone();
        Controller::new(clusters.clone(), watcher::Config::default().any_semantic())
            .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
            .owns(Api::<StatefulSet>::all(client.clone()), watcher::Config::default())
            .with_config(
                controller::Config::default().concurrency(config.max_concurrent_reconciliations),
            )
            .shutdown_on_signal()
            .run(
                create_reconcile_fn,
                handle_reconciliation_error,
                Arc::clone(&reconciler),
            )
            .filter_map(move |event| {
                let backoff = Arc::clone(&backoff);
                let config = filter_config.clone();
                async move {
                    let Err(e) = &event else {
                        backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                        debug!("watch.event.success");
                        return Some(event);
                    };
                    let error_string = format!("{e:?}");
                    handle_watch_stream_error(
                        &error_string,
                        &backoff,
                        config.backoff_max_ms,
                        config.watch_restart_delay_duration(),
                    )
                    .await
                    .map(|()| event)
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if shutdown.is_cancelled() {
            break;
        }
        warn!(
            delay_secs = config.watch_restart_delay_after_end_secs,
            "Controller watch stream ended, restarting"
        );
        // The stream also ends on SIGTERM, racing the handler that cancels `shutdown`
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(config.watch_restart_delay_after_end_duration()) => {}
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Gate the event, then run a pass for real triggers
fn create_reconcile_fn(
    obj: Arc<VirtualCluster>,
    ctx: Arc<Reconciler>,
) -> impl Future<Output = Result<Action, ReconcilerError>> + Send {
    let name = obj.metadata.name.clone().unwrap_or_else(|| "unknown".to_string());
    let generation = obj.metadata.generation.unwrap_or(0);
    let observed_generation = obj
        .status
        .as_ref()
        .and_then(|s| s.observed_generation)
        .unwrap_or(0);
    let span = tracing::info_span!(
        "controller.watch.reconcile",
        resource.name = name.as_str(),
        resource.generation = generation,
        resource.observed_generation = observed_generation,
        event.r#type = "watch_triggered"
    );

    async move {
        let now = Utc::now();
        let backoff = ctx.backoff_remaining(&name, now);
        match reconciler::classify(&obj, ctx.config(), backoff, now) {
            Ok(trigger) => reconcile(obj, ctx, trigger).await,
            Err(remaining) => {
                debug!(
                    remaining_secs = remaining.as_secs(),
                    "Skipping reconciliation - pass not due yet"
                );
                Ok(Action::requeue(remaining))
            }
        }
    }
    .instrument(span)
}
