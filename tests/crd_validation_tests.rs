//! # CRD Validation Tests
//!
//! Sample manifests must keep deserializing as the schema evolves, and the
//! generated CRD must carry the fields the operator relies on.

use kube::core::CustomResourceExt;
use virtual_cluster_operator::controller::validation::validate_virtual_cluster;
use virtual_cluster_operator::crd::{OperationState, VirtualCluster};

/// Minimal manifest picks up every default
#[test]
fn test_minimal_manifest_defaults() {
    let yaml = r#"
apiVersion: operator.octopilot.io/v1alpha1
kind: VirtualCluster
metadata:
  name: tenant-a
spec:
  kubernetes:
    version: "1.30.4"
  networking:
    services: 100.64.0.0/13
  dns:
    domains: ["api.tenant-a.example.com"]
"#;
    let cluster: VirtualCluster =
        serde_yaml::from_str(yaml).expect("Should deserialize minimal manifest");

    assert_eq!(cluster.target_namespace(), "vc-tenant-a");
    assert_eq!(cluster.primary_domain(), Some("api.tenant-a.example.com"));
    assert_eq!(cluster.spec.sync_interval, "5m");
    assert_eq!(cluster.spec.etcd.replicas, 1);
    assert_eq!(cluster.spec.etcd.storage_size, "10Gi");
    assert!(cluster.spec.features.static_token_kubeconfig);
    assert!(!cluster.spec.features.high_availability);
    assert!(validate_virtual_cluster(&cluster).is_ok());
}

/// Every field set explicitly, with a status written by the operator
#[test]
fn test_full_manifest_with_status() {
    let yaml = r#"
apiVersion: operator.octopilot.io/v1alpha1
kind: VirtualCluster
metadata:
  name: tenant-b
  generation: 4
spec:
  namespace: tenants-b
  zones: ["eu-west-1a", "eu-west-1b", "eu-west-1c"]
  kubernetes:
    version: v1.31.0
  networking:
    services: 100.64.0.0/13
    pods: 100.96.0.0/11
  dns:
    domains: ["api.tenant-b.example.com", "tenant-b.internal"]
  etcd:
    replicas: 3
    storageSize: 20Gi
  features:
    staticTokenKubeconfig: false
    highAvailability: true
  syncInterval: 10m
status:
  observedGeneration: 4
  lastOperation:
    type: Reconcile
    state: Progressing
    description: "Waiting for etcd: statefulset not ready: 1/3 replicas ready"
    progress: 33
    lastUpdateTime: "2026-10-17T08:00:00Z"
  conditions:
    - type: Reconciled
      status: "False"
      reason: Waiting
  credentials:
    certificateAuthorities:
      phase: Prepared
      lastInitiationTime: "2026-10-17T07:55:00Z"
"#;
    let cluster: VirtualCluster =
        serde_yaml::from_str(yaml).expect("Should deserialize full manifest");

    assert_eq!(cluster.target_namespace(), "tenants-b");
    assert_eq!(cluster.spec.etcd.replicas, 3);
    assert!(cluster.spec.features.high_availability);
    let status = cluster.status.as_ref().expect("Should have a status");
    let last = status.last_operation.as_ref().expect("Should have a last operation");
    assert_eq!(last.state, OperationState::Progressing);
    assert_eq!(last.progress, 33);
    assert!(validate_virtual_cluster(&cluster).is_ok());
}

/// An even datastore replica count cannot form a stable quorum
#[test]
fn test_even_etcd_replicas_rejected() {
    let yaml = r#"
apiVersion: operator.octopilot.io/v1alpha1
kind: VirtualCluster
metadata:
  name: tenant-c
spec:
  kubernetes:
    version: "1.30.4"
  networking:
    services: 100.64.0.0/13
  dns:
    domains: ["api.tenant-c.example.com"]
  etcd:
    replicas: 2
"#;
    let cluster: VirtualCluster = serde_yaml::from_str(yaml).expect("Should deserialize");
    assert!(validate_virtual_cluster(&cluster).is_err());
}

/// The generated CRD is cluster scoped with a status subresource
#[test]
fn test_generated_crd() {
    let crd = VirtualCluster::crd();
    assert_eq!(crd.spec.group, "operator.octopilot.io");
    assert_eq!(crd.spec.scope, "Cluster");
    assert_eq!(crd.spec.names.kind, "VirtualCluster");
    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());
}
