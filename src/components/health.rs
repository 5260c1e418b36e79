//! # Workload Health
//!
//! Pure readiness checks over observed workload status. An `Err` carries the
//! reason the workload is not ready yet.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Namespace;

fn generation_observed(generation: Option<i64>, observed: Option<i64>) -> Result<(), String> {
    match (generation, observed) {
        (Some(generation), Some(observed)) if observed < generation => Err(format!(
            "observed generation {observed} is behind generation {generation}"
        )),
        (Some(_), None) => Err("status not yet observed".to_string()),
        _ => Ok(()),
    }
}

fn replicas_ready(kind: &str, desired: i32, updated: i32, ready: i32) -> Result<(), String> {
    if updated < desired {
        return Err(format!("{kind} rollout in progress: {updated}/{desired} replicas updated"));
    }
    if ready < desired {
        return Err(format!("{kind} not ready: {ready}/{desired} replicas ready"));
    }
    Ok(())
}

pub fn deployment_health(deployment: &Deployment) -> Result<(), String> {
    let status = deployment
        .status
        .as_ref()
        .ok_or_else(|| "deployment has no status yet".to_string())?;
    generation_observed(deployment.metadata.generation, status.observed_generation)?;
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    replicas_ready(
        "deployment",
        desired,
        status.updated_replicas.unwrap_or(0),
        status.available_replicas.unwrap_or(0),
    )
}

pub fn statefulset_health(statefulset: &StatefulSet) -> Result<(), String> {
    let status = statefulset
        .status
        .as_ref()
        .ok_or_else(|| "statefulset has no status yet".to_string())?;
    generation_observed(statefulset.metadata.generation, status.observed_generation)?;
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    replicas_ready(
        "statefulset",
        desired,
        status.updated_replicas.unwrap_or(0),
        status.ready_replicas.unwrap_or(0),
    )
}

pub fn namespace_health(namespace: &Namespace) -> Result<(), String> {
    match namespace.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Active") => Ok(()),
        Some(phase) => Err(format!("namespace is {phase}")),
        None => Err("namespace has no phase yet".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{
        DeploymentSpec, DeploymentStatus, StatefulSetSpec, StatefulSetStatus,
    };
    use k8s_openapi::api::core::v1::NamespaceStatus;
    use kube::api::ObjectMeta;

    fn deployment(generation: i64, observed: i64, updated: i32, available: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                generation: Some(generation),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..DeploymentSpec::default()
            }),
            status: Some(DeploymentStatus {
                observed_generation: Some(observed),
                updated_replicas: Some(updated),
                available_replicas: Some(available),
                ..DeploymentStatus::default()
            }),
        }
    }

    #[test]
    fn test_deployment_health() {
        assert!(deployment_health(&deployment(3, 3, 2, 2)).is_ok());
        assert!(deployment_health(&deployment(3, 2, 2, 2))
            .unwrap_err()
            .contains("behind"));
        assert!(deployment_health(&deployment(3, 3, 1, 2))
            .unwrap_err()
            .contains("rollout"));
        assert!(deployment_health(&deployment(3, 3, 2, 1))
            .unwrap_err()
            .contains("1/2"));
        assert!(deployment_health(&Deployment::default()).is_err());
    }

    #[test]
    fn test_statefulset_health() {
        let statefulset = |ready| StatefulSet {
            metadata: ObjectMeta::default(),
            spec: Some(StatefulSetSpec {
                replicas: Some(3),
                ..StatefulSetSpec::default()
            }),
            status: Some(StatefulSetStatus {
                updated_replicas: Some(3),
                ready_replicas: Some(ready),
                replicas: 3,
                ..StatefulSetStatus::default()
            }),
        };
        assert!(statefulset_health(&statefulset(3)).is_ok());
        assert!(statefulset_health(&statefulset(2)).is_err());
    }

    #[test]
    fn test_namespace_health() {
        let namespace = |phase: &str| Namespace {
            status: Some(NamespaceStatus {
                phase: Some(phase.to_string()),
                ..NamespaceStatus::default()
            }),
            ..Namespace::default()
        };
        assert!(namespace_health(&namespace("Active")).is_ok());
        assert_eq!(
            namespace_health(&namespace("Terminating")),
            Err("namespace is Terminating".to_string())
        );
    }
}
