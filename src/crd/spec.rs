//! # VirtualCluster Spec
//!
//! Main CRD specification types and default values.

use serde::{Deserialize, Serialize};

/// VirtualCluster Custom Resource Definition
///
/// Declares one nested control plane hosted inside the management cluster.
///
/// # Example
///
/// ```yaml
/// apiVersion: operator.octopilot.io/v1alpha1
/// kind: VirtualCluster
/// metadata:
///   name: tenant-a
/// spec:
///   zones: ["eu-west-1a", "eu-west-1b"]
///   kubernetes:
///     version: "1.30.4"
///   networking:
///     services: 100.64.0.0/13
///   dns:
///     domains: ["api.tenant-a.example.com"]
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "VirtualCluster",
    group = "operator.octopilot.io",
    version = "v1alpha1",
    status = "crate::crd::VirtualClusterStatus",
    shortname = "vc",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.lastOperation.state"}, {"name":"Progress", "type":"integer", "jsonPath":".status.lastOperation.progress"}, {"name":"Reconciled", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Reconciled\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualClusterSpec {
    /// Namespace hosting the control plane components and credential records
    /// Default: `vc-<name>`
    #[serde(default)]
    pub namespace: Option<String>,
    /// Availability zones the control plane spreads over
    #[serde(default)]
    pub zones: Vec<String>,
    /// Kubernetes version of the virtual control plane
    pub kubernetes: KubernetesConfig,
    /// Network ranges of the virtual cluster
    pub networking: NetworkingConfig,
    /// Domains the virtual API server is reachable under
    pub dns: DnsConfig,
    /// Datastore settings
    #[serde(default)]
    pub etcd: EtcdConfig,
    /// Feature toggles
    #[serde(default)]
    pub features: FeatureToggles,
    /// Resync interval after a successful reconciliation
    /// Format: Kubernetes duration string (e.g., "30s", "5m", "1h")
    /// Default: "5m"
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingConfig {
    /// Service CIDR of the virtual cluster
    pub services: String,
    /// Pod CIDR of the virtual cluster
    #[serde(default)]
    pub pods: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    /// The first domain is the primary one written into kubeconfigs
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdConfig {
    #[serde(default = "default_etcd_replicas")]
    pub replicas: i32,
    #[serde(default = "default_etcd_storage_size")]
    pub storage_size: String,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            replicas: default_etcd_replicas(),
            storage_size: default_etcd_storage_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureToggles {
    /// Issue a static-token admin kubeconfig
    /// Default: true
    #[serde(default = "default_true")]
    pub static_token_kubeconfig: bool,
    /// Run API server and controller manager with two replicas
    /// Default: false
    #[serde(default = "default_false")]
    pub high_availability: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            static_token_kubeconfig: true,
            high_availability: false,
        }
    }
}

impl VirtualCluster {
    /// Namespace hosting this virtual cluster's components
    #[must_use]
    pub fn target_namespace(&self) -> String {
        self.spec.namespace.clone().unwrap_or_else(|| {
            format!("vc-{}", self.metadata.name.as_deref().unwrap_or("unknown"))
        })
    }

    /// Primary domain of the virtual API server
    #[must_use]
    pub fn primary_domain(&self) -> Option<&str> {
        self.spec.dns.domains.first().map(String::as_str)
    }
}

/// Default value for the resync interval
pub fn default_sync_interval() -> String {
    crate::constants::DEFAULT_SYNC_INTERVAL.to_string()
}

/// Default number of datastore replicas
pub fn default_etcd_replicas() -> i32 {
    1
}

/// Default datastore volume size
pub fn default_etcd_storage_size() -> String {
    "10Gi".to_string()
}

/// Default value for boolean true
pub fn default_true() -> bool {
    true
}

/// Default value for boolean false
pub fn default_false() -> bool {
    false
}
