//! # Trigger Gate
//!
//! Status writes made by a pass come back as watch events. The gate tells
//! those echoes apart from real triggers so a settled resource is not
//! reconciled in a tight loop.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ControllerConfig;
use crate::constants::OPERATION_ANNOTATION;
use crate::controller::orchestrator::pass_due;
use crate::controller::reconciler::types::TriggerSource;
use crate::controller::validation;
use crate::crd::VirtualCluster;

/// Classify a watch event, or return how long until the next pass is due
///
/// `backoff` is the delay still pending after a failed pass; it holds back
/// timer-triggered retries but never a spec change, operation or deletion.
pub fn classify(
    cluster: &VirtualCluster,
    config: &ControllerConfig,
    backoff: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<TriggerSource, Duration> {
    let has_operation = cluster
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(OPERATION_ANNOTATION));
    // An unparsable interval is reported by the pass itself
    let sync_interval =
        validation::sync_interval(cluster).unwrap_or_else(|_| config.requeue_delay());
    pass_due(cluster, has_operation, config, sync_interval, now)?;

    let observed = cluster.status.as_ref().and_then(|s| s.observed_generation);
    let trigger = if cluster.metadata.deletion_timestamp.is_some() {
        TriggerSource::Deletion
    } else if has_operation {
        TriggerSource::Operation
    } else if observed != cluster.metadata.generation {
        TriggerSource::SpecChange
    } else {
        TriggerSource::TimerBased
    };
    match backoff {
        Some(remaining) if trigger == TriggerSource::TimerBased => Err(remaining),
        _ => Ok(trigger),
    }
}
