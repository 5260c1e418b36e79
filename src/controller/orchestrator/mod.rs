//! # Phase Orchestrator
//!
//! Drives one reconciliation pass of a `VirtualCluster`: walks the phase list
//! of its flow in order, stops at the first phase that is not healthy yet and
//! records the outcome in the status. Deletion walks the same list in reverse
//! and releases the finalizer once every phase confirmed its cleanup.
//!
//! ## Module Structure
//!
//! - `decision.rs` - Pure status and requeue decisions
//! - `error.rs` - Pass errors
//! - `phase.rs` - Phases and flow builders
//! - `rotation.rs` - Credential rotation operations

pub mod decision;
mod error;
pub mod phase;
pub mod rotation;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::components::{DeployContext, DeployError};
use crate::config::ControllerConfig;
use crate::constants::{FINALIZER, OPERATION_ANNOTATION};
use crate::controller::resource::{ResourceClient, ResourceError};
use crate::controller::validation;
use crate::credentials::{CredentialManager, CredentialStore};
use crate::crd::{OperationType, VirtualCluster, VirtualClusterStatus};
use crate::observability::metrics;

pub use decision::{decide, next_status, pass_due, Decision, PassOutcome, Progress};
pub use error::PassError;
pub use phase::{DefaultFlow, FlowBuilder, Phase};
pub use rotation::Operation;

/// Result of a conditional status write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusWrite {
    Written,
    /// Stale generation, resource gone or conflicts exhausted
    Dropped,
}

/// Why a phase stopped the walk
enum Halt {
    Waiting(String),
    Failed(PassError),
}

impl Halt {
    fn from_deploy(phase: &str, error: DeployError) -> Self {
        match error {
            DeployError::NotReady(reason) => Halt::Waiting(reason),
            other => Halt::Failed(PassError::from_deploy(phase, other)),
        }
    }
}

pub struct Orchestrator {
    resources: Arc<dyn ResourceClient>,
    store: Arc<dyn CredentialStore>,
    flow: Arc<dyn FlowBuilder>,
    config: ControllerConfig,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        resources: Arc<dyn ResourceClient>,
        store: Arc<dyn CredentialStore>,
        flow: Arc<dyn FlowBuilder>,
        config: ControllerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            resources,
            store,
            flow,
            config,
            shutdown,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one pass for `cluster` as observed by the trigger
    pub async fn reconcile(&self, cluster: Arc<VirtualCluster>) -> Decision {
        if cluster.metadata.deletion_timestamp.is_some() {
            return self.delete(cluster).await;
        }
        let name = cluster.metadata.name.clone().unwrap_or_default();

        let finalizers = cluster.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == FINALIZER) {
            let mut finalizers = finalizers;
            finalizers.push(FINALIZER.to_string());
            if let Err(e) = self.resources.set_finalizers(&name, finalizers).await {
                return Decision::Retry(e.into());
            }
            debug!(resource.name = name.as_str(), "finalizer.added");
        }

        let now = Utc::now();
        let mut base = cluster.status.clone().unwrap_or_default();

        let operation = requested_operation(&cluster);
        if let Some(Ok(operation)) = operation {
            match rotation::apply_operation(base.credentials.take(), operation, now) {
                Ok(credentials) => {
                    info!(
                        resource.name = name.as_str(),
                        operation = ?operation,
                        "Accepted operation"
                    );
                    base.credentials = credentials;
                }
                Err(reason) => {
                    warn!(
                        resource.name = name.as_str(),
                        operation = ?operation,
                        reason = reason.as_str(),
                        "Rejected operation"
                    );
                    base.credentials = cluster.status.as_ref().and_then(|s| s.credentials.clone());
                }
            }
        } else if let Some(Err(reason)) = &operation {
            warn!(
                resource.name = name.as_str(),
                reason = reason.as_str(),
                "Ignoring operation annotation"
            );
        }

        let sync_interval = match validation::validate_virtual_cluster(&cluster) {
            Ok(interval) => interval,
            Err(e) => {
                let outcome = PassOutcome::Failed {
                    error: PassError::InvalidConfig(e.to_string()),
                    progress: Progress::default(),
                };
                return self
                    .finish_pass(&cluster, base, operation.is_some(), outcome, None)
                    .await;
            }
        };

        let phases = self.flow.build(&cluster);
        let outcome = self
            .guarded(self.run_pass(Arc::clone(&cluster), &base, &phases))
            .await;

        if matches!(outcome, PassOutcome::Completed { .. }) {
            base.credentials = rotation::advance(base.credentials.take(), now);
        }
        self.finish_pass(&cluster, base, operation.is_some(), outcome, Some(sync_interval))
            .await
    }

    /// Race `pass` against shutdown and the pass timeout
    async fn guarded<F>(&self, pass: F) -> PassOutcome
    where
        F: Future<Output = PassOutcome>,
    {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                info!("Pass cancelled by shutdown");
                PassOutcome::Cancelled
            }
            result = tokio::time::timeout(self.config.pass_timeout(), pass) => {
                result.unwrap_or_else(|_| {
                    warn!(
                        timeout_secs = self.config.pass_timeout_secs,
                        "Pass timed out"
                    );
                    PassOutcome::Cancelled
                })
            }
        }
    }

    async fn load_context(
        &self,
        cluster: Arc<VirtualCluster>,
        status: &VirtualClusterStatus,
    ) -> Result<DeployContext, PassError> {
        let namespace = cluster.target_namespace();
        let credentials = CredentialManager::load(
            Arc::clone(&self.store),
            &namespace,
            &self.config.manager_identity,
            rotation::epochs(status.credentials.as_ref()),
        )
        .await
        .map_err(|e| PassError::from_credential("load", e))?;
        Ok(DeployContext {
            cluster,
            namespace,
            credentials: Arc::new(credentials),
            rotation: rotation::context(status.credentials.as_ref()),
            image_registry: self.config.image_registry.clone(),
        })
    }

    async fn run_pass(
        &self,
        cluster: Arc<VirtualCluster>,
        status: &VirtualClusterStatus,
        phases: &[Phase],
    ) -> PassOutcome {
        let mut progress = Progress {
            completed: 0,
            total: phases.len(),
            credentials_issued: false,
        };
        let ctx = match self.load_context(cluster, status).await {
            Ok(ctx) => ctx,
            Err(error) => return PassOutcome::Failed { error, progress },
        };

        for phase in phases {
            let name = phase.name().to_string();
            debug!(phase = name.as_str(), namespace = ctx.namespace.as_str(), "phase.start");
            match run_phase(phase, &ctx).await {
                Ok(()) => {
                    progress.completed += 1;
                    if matches!(phase, Phase::Credentials(_)) {
                        progress.credentials_issued = true;
                    }
                }
                Err(Halt::Waiting(reason)) => {
                    metrics::increment_phase_waits(&name);
                    debug!(phase = name.as_str(), reason = reason.as_str(), "phase.waiting");
                    return PassOutcome::Waiting {
                        phase: name,
                        reason,
                        progress,
                    };
                }
                Err(Halt::Failed(error)) => {
                    warn!(phase = name.as_str(), error = %error, "Phase failed");
                    return PassOutcome::Failed { error, progress };
                }
            }
        }

        match ctx.credentials.cleanup().await {
            Ok(deleted) => debug!(deleted = deleted, "credential.gc.done"),
            Err(e) => {
                metrics::increment_credential_gc_failures();
                warn!(
                    namespace = ctx.namespace.as_str(),
                    error = %e,
                    "Failed to garbage collect credential records"
                );
            }
        }
        PassOutcome::Completed { progress }
    }

    /// Write the status of a finished pass and turn its outcome into a decision
    async fn finish_pass(
        &self,
        cluster: &VirtualCluster,
        base: VirtualClusterStatus,
        consume_annotation: bool,
        outcome: PassOutcome,
        sync_interval: Option<Duration>,
    ) -> Decision {
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        let status = next_status(
            Some(&base),
            OperationType::Reconcile,
            &outcome,
            cluster.metadata.generation,
            Utc::now(),
        );
        if let Some(status) = status {
            let written = match self.write_status(cluster, status).await {
                Ok(written) => written,
                Err(e) => return Decision::Retry(e.into()),
            };
            // An accepted operation lives only in the status; keep the request until it lands
            if consume_annotation && written == StatusWrite::Written {
                if let Err(e) = self.resources.remove_annotation(name, OPERATION_ANNOTATION).await {
                    warn!(
                        resource.name = name,
                        error = %e,
                        "Failed to remove operation annotation"
                    );
                }
            }
        }
        let sync_interval = sync_interval.unwrap_or_else(|| self.config.requeue_delay());
        decide(outcome, &self.config, sync_interval)
    }

    /// Conditional status write, re-applied on conflicts while the generation is unchanged
    async fn write_status(
        &self,
        cluster: &VirtualCluster,
        status: VirtualClusterStatus,
    ) -> Result<StatusWrite, ResourceError> {
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let mut target = cluster.clone();
        target.status = Some(status);

        for attempt in 0..=self.config.status_conflict_retries {
            match self.resources.replace_status(&target).await {
                Ok(()) => return Ok(StatusWrite::Written),
                Err(ResourceError::Conflict(_)) => {
                    metrics::increment_status_conflicts();
                    let Some(mut fresh) = self.resources.get(&name).await? else {
                        debug!(resource.name = name.as_str(), "status.write.resource_gone");
                        return Ok(StatusWrite::Dropped);
                    };
                    if fresh.metadata.generation != cluster.metadata.generation {
                        debug!(
                            resource.name = name.as_str(),
                            attempt = attempt,
                            "status.write.stale"
                        );
                        return Ok(StatusWrite::Dropped);
                    }
                    fresh.status = target.status.take();
                    target = fresh;
                }
                Err(e) => return Err(e),
            }
        }
        warn!(
            resource.name = name.as_str(),
            attempts = self.config.status_conflict_retries + 1,
            "Dropping status write after repeated conflicts"
        );
        Ok(StatusWrite::Dropped)
    }

    async fn delete(&self, cluster: Arc<VirtualCluster>) -> Decision {
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let finalizers = cluster.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == FINALIZER) {
            return Decision::AwaitChange;
        }
        info!(resource.name = name.as_str(), "Tearing down virtual cluster");

        let base = cluster.status.clone().unwrap_or_default();
        let mut phases = self.flow.build(&cluster);
        phases.reverse();
        let outcome = self
            .guarded(self.run_teardown(Arc::clone(&cluster), &base, &phases))
            .await;

        match outcome {
            PassOutcome::Completed { .. } => {
                let remaining: Vec<String> =
                    finalizers.into_iter().filter(|f| f != FINALIZER).collect();
                if let Err(e) = self.resources.set_finalizers(&name, remaining).await {
                    return match e {
                        ResourceError::NotFound(_) => Decision::AwaitChange,
                        e => Decision::Retry(e.into()),
                    };
                }
                info!(resource.name = name.as_str(), "Virtual cluster deleted, finalizer removed");
                Decision::AwaitChange
            }
            PassOutcome::Cancelled => Decision::Requeue(self.config.requeue_delay()),
            outcome => {
                let status = next_status(
                    Some(&base),
                    OperationType::Delete,
                    &outcome,
                    cluster.metadata.generation,
                    Utc::now(),
                );
                if let Some(status) = status {
                    if let Err(e) = self.write_status(&cluster, status).await {
                        return Decision::Retry(e.into());
                    }
                }
                match outcome {
                    PassOutcome::Failed { error, .. } => Decision::Retry(error),
                    _ => Decision::Requeue(self.config.requeue_delay()),
                }
            }
        }
    }

    async fn run_teardown(
        &self,
        cluster: Arc<VirtualCluster>,
        status: &VirtualClusterStatus,
        phases: &[Phase],
    ) -> PassOutcome {
        let mut progress = Progress {
            completed: 0,
            total: phases.len(),
            credentials_issued: false,
        };
        let ctx = match self.load_context(cluster, status).await {
            Ok(ctx) => ctx,
            Err(error) => return PassOutcome::Failed { error, progress },
        };

        for phase in phases {
            let name = phase.name().to_string();
            match teardown_phase(phase, &ctx).await {
                Ok(()) => progress.completed += 1,
                Err(Halt::Waiting(reason)) => {
                    metrics::increment_phase_waits(&name);
                    return PassOutcome::Waiting {
                        phase: name,
                        reason,
                        progress,
                    };
                }
                Err(Halt::Failed(error)) => return PassOutcome::Failed { error, progress },
            }
        }
        PassOutcome::Completed { progress }
    }
}

/// Operation requested through the annotation, if any
fn requested_operation(cluster: &VirtualCluster) -> Option<Result<Operation, String>> {
    cluster
        .metadata
        .annotations
        .as_ref()?
        .get(OPERATION_ANNOTATION)
        .map(|value| value.parse())
}

async fn run_phase(phase: &Phase, ctx: &DeployContext) -> Result<(), Halt> {
    let name = phase.name();
    let halt = |e| Halt::from_deploy(name, e);
    match phase {
        Phase::Credentials(step) => step
            .ensure(ctx)
            .await
            .map_err(|e| Halt::Failed(PassError::from_credential(name, e))),
        Phase::Deploy(deployer) => {
            deployer.deploy(ctx).await.map_err(halt)?;
            deployer.wait(ctx).await.map_err(halt)
        }
        Phase::BootstrapThenSwap(deployer) => {
            match deployer.wait_bootstrap(ctx).await {
                Ok(()) => {}
                Err(DeployError::NotReady(reason)) => {
                    debug!(phase = name, reason = reason.as_str(), "bootstrap.start");
                    deployer.deploy_bootstrap(ctx).await.map_err(halt)?;
                    deployer.wait_bootstrap(ctx).await.map_err(halt)?;
                }
                Err(e) => return Err(halt(e)),
            }
            deployer.deploy(ctx).await.map_err(halt)?;
            deployer.wait(ctx).await.map_err(halt)?;
            deployer.finish_bootstrap(ctx).await.map_err(halt)
        }
    }
}

async fn teardown_phase(phase: &Phase, ctx: &DeployContext) -> Result<(), Halt> {
    let name = phase.name();
    let halt = |e| Halt::from_deploy(name, e);
    match phase {
        Phase::Credentials(step) => step
            .teardown(ctx)
            .await
            .map_err(|e| Halt::Failed(PassError::from_credential(name, e))),
        Phase::Deploy(deployer) => {
            deployer.destroy(ctx).await.map_err(halt)?;
            deployer.wait_cleanup(ctx).await.map_err(halt)
        }
        Phase::BootstrapThenSwap(deployer) => {
            deployer.destroy(ctx).await.map_err(halt)?;
            deployer.wait_cleanup(ctx).await.map_err(halt)
        }
    }
}
