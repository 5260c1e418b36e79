//! # Decision Core
//!
//! Pure functions turning the outcome of a pass into the next status and into
//! what the runtime should do next. Nothing here performs I/O.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::ControllerConfig;
use crate::controller::orchestrator::error::PassError;
use crate::crd::{
    Condition, LastOperation, OperationState, OperationType, VirtualCluster, VirtualClusterStatus,
};

pub const CONDITION_CREDENTIALS_ISSUED: &str = "CredentialsIssued";
pub const CONDITION_COMPONENTS_HEALTHY: &str = "ComponentsHealthy";
pub const CONDITION_RECONCILED: &str = "Reconciled";

/// How far a pass got through its phase list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    /// Every credential phase reached so far succeeded
    pub credentials_issued: bool,
}

impl Progress {
    #[must_use]
    pub fn percent(&self) -> i32 {
        if self.total == 0 {
            return 100;
        }
        let percent = self.completed.min(self.total) * 100 / self.total;
        i32::try_from(percent).unwrap_or(100)
    }
}

#[derive(Debug)]
pub enum PassOutcome {
    /// Every phase is healthy
    Completed { progress: Progress },
    /// A phase is converging; later phases were not attempted
    Waiting {
        phase: String,
        reason: String,
        progress: Progress,
    },
    Failed { error: PassError, progress: Progress },
    /// Shutdown or pass timeout; nothing is written
    Cancelled,
}

impl PassOutcome {
    #[must_use]
    pub fn progress(&self) -> Option<Progress> {
        match self {
            PassOutcome::Completed { progress }
            | PassOutcome::Waiting { progress, .. }
            | PassOutcome::Failed { progress, .. } => Some(*progress),
            PassOutcome::Cancelled => None,
        }
    }
}

#[derive(Debug)]
pub enum Decision {
    Requeue(Duration),
    /// Nothing to do until the resource changes
    AwaitChange,
    /// Surface the error to the runtime's error policy
    Retry(PassError),
}

#[must_use]
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: bool,
    reason: &str,
    message: Option<String>,
    now: &str,
) {
    let status = if status { "True" } else { "False" };
    match conditions.iter_mut().find(|c| c.r#type == condition_type) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Some(now.to_string());
            }
            existing.last_update_time = Some(now.to_string());
            existing.reason = Some(reason.to_string());
            existing.message = message;
        }
        None => conditions.push(Condition {
            r#type: condition_type.to_string(),
            status: status.to_string(),
            last_transition_time: Some(now.to_string()),
            last_update_time: Some(now.to_string()),
            reason: Some(reason.to_string()),
            message,
        }),
    }
}

/// Status after a pass, or `None` when the pass must not write
#[must_use]
pub fn next_status(
    previous: Option<&VirtualClusterStatus>,
    operation: OperationType,
    outcome: &PassOutcome,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Option<VirtualClusterStatus> {
    let progress = outcome.progress()?;
    let now = timestamp(now);
    let mut status = previous.cloned().unwrap_or_default();
    let first_operation = status.last_operation.is_none();

    let (state, description) = match (outcome, operation) {
        (PassOutcome::Completed { .. }, OperationType::Reconcile) => (
            OperationState::Succeeded,
            "Virtual cluster reconciled".to_string(),
        ),
        (PassOutcome::Completed { .. }, OperationType::Delete) => (
            OperationState::Succeeded,
            "Virtual cluster deleted".to_string(),
        ),
        (PassOutcome::Waiting { phase, reason, .. }, _) => {
            let state = if first_operation && progress.completed == 0 {
                OperationState::Pending
            } else {
                OperationState::Progressing
            };
            (state, format!("Waiting for {phase}: {reason}"))
        }
        (PassOutcome::Failed { error, .. }, _) => (OperationState::Error, error.to_string()),
        (PassOutcome::Cancelled, _) => return None,
    };
    let progress_percent = match outcome {
        PassOutcome::Completed { .. } => 100,
        _ => progress.percent(),
    };

    match operation {
        OperationType::Reconcile => {
            let reason = match outcome {
                PassOutcome::Failed { .. } => "Failed",
                _ => "Waiting",
            };
            if progress.credentials_issued {
                set_condition(
                    &mut status.conditions,
                    CONDITION_CREDENTIALS_ISSUED,
                    true,
                    "Issued",
                    None,
                    &now,
                );
            } else {
                set_condition(
                    &mut status.conditions,
                    CONDITION_CREDENTIALS_ISSUED,
                    false,
                    reason,
                    Some(description.clone()),
                    &now,
                );
            }
            let completed = matches!(outcome, PassOutcome::Completed { .. });
            let message = (!completed).then(|| description.clone());
            let (healthy_reason, reconciled_reason) = if completed {
                ("Healthy", "Succeeded")
            } else {
                (reason, reason)
            };
            set_condition(
                &mut status.conditions,
                CONDITION_COMPONENTS_HEALTHY,
                completed,
                healthy_reason,
                message.clone(),
                &now,
            );
            set_condition(
                &mut status.conditions,
                CONDITION_RECONCILED,
                completed,
                reconciled_reason,
                message,
                &now,
            );
            status.observed_generation = generation.or(status.observed_generation);
        }
        OperationType::Delete => {
            set_condition(
                &mut status.conditions,
                CONDITION_RECONCILED,
                false,
                "Deleting",
                Some(description.clone()),
                &now,
            );
        }
    }

    status.last_operation = Some(LastOperation {
        r#type: operation,
        state,
        description,
        progress: progress_percent,
        last_update_time: now,
    });
    Some(status)
}

/// What the runtime does after a pass
#[must_use]
pub fn decide(
    outcome: PassOutcome,
    config: &ControllerConfig,
    sync_interval: Duration,
) -> Decision {
    match outcome {
        PassOutcome::Completed { .. } => Decision::Requeue(sync_interval),
        PassOutcome::Waiting { .. } | PassOutcome::Cancelled => {
            Decision::Requeue(config.requeue_delay())
        }
        PassOutcome::Failed { error, .. } if error.is_invalid_config() => Decision::AwaitChange,
        PassOutcome::Failed { error, .. } => Decision::Retry(error),
    }
}

/// Slack for requeue timers firing slightly early
const DUE_TOLERANCE: Duration = Duration::from_secs(2);

/// Whether a trigger should run a pass
///
/// Own status writes trigger watch events too. A pass runs when the spec
/// changed, an operation was requested, the resource is being deleted or the
/// last write is older than the interval its state asks for. Otherwise the
/// remaining time until the pass is due is returned.
#[must_use]
pub fn pass_due(
    cluster: &VirtualCluster,
    has_operation: bool,
    config: &ControllerConfig,
    sync_interval: Duration,
    now: DateTime<Utc>,
) -> Result<(), Duration> {
    if cluster.metadata.deletion_timestamp.is_some() || has_operation {
        return Ok(());
    }
    let Some(status) = &cluster.status else {
        return Ok(());
    };
    if status.observed_generation != cluster.metadata.generation {
        return Ok(());
    }
    let Some(last) = &status.last_operation else {
        return Ok(());
    };
    let interval = match (last.r#type, last.state) {
        (OperationType::Reconcile, OperationState::Succeeded) => sync_interval,
        // Retries of failed passes are held back by the reconciler's backoff
        (_, OperationState::Error) => return Ok(()),
        _ => config.requeue_delay(),
    };
    let Ok(written) = DateTime::parse_from_rfc3339(&last.last_update_time) else {
        return Ok(());
    };
    let elapsed = (now - written.with_timezone(&Utc))
        .to_std()
        .unwrap_or_default();
    if elapsed + DUE_TOLERANCE >= interval {
        Ok(())
    } else {
        Err(interval - elapsed)
    }
}
