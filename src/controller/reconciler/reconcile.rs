//! # Reconciliation Logic
//!
//! Runs one orchestrator pass and maps its decision onto a controller action.
//! Failures are returned as errors so the error policy applies its backoff.

use std::sync::Arc;
use std::time::Instant;

use kube_runtime::controller::Action;
use tracing::{debug, info, Instrument};

use crate::controller::orchestrator::Decision;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError, TriggerSource};
use crate::crd::VirtualCluster;
use crate::observability::metrics;

pub async fn reconcile(
    cluster: Arc<VirtualCluster>,
    ctx: Arc<Reconciler>,
    trigger_source: TriggerSource,
) -> Result<Action, ReconcilerError> {
    let name = cluster.metadata.name.clone().unwrap_or_default();
    let span = tracing::info_span!(
        "reconcile",
        resource.name = name.as_str(),
        resource.kind = "VirtualCluster",
        trigger_source = trigger_source.as_str()
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations();
        debug!(trigger_source = trigger_source.as_str(), "reconcile.start");

        let decision = ctx.orchestrator.reconcile(cluster).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match decision {
            Decision::Requeue(delay) => {
                ctx.reset_backoff(&name);
                metrics::increment_requeues("scheduled");
                debug!(delay_secs = delay.as_secs(), "reconcile.requeue");
                Ok(Action::requeue(delay))
            }
            Decision::AwaitChange => {
                ctx.reset_backoff(&name);
                info!("Reconciliation settled, waiting for the next change");
                Ok(Action::await_change())
            }
            Decision::Retry(error) => Err(error.into()),
        }
    }
    .instrument(span)
    .await
}
