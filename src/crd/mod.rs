//! # Custom Resource Definitions
//!
//! CRD types for the virtual cluster operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `VirtualCluster` specification and default values
//! - `status.rs` - Status types for last operation, conditions and rotation

mod spec;
mod status;

pub use spec::{
    default_etcd_replicas, default_etcd_storage_size, default_false, default_sync_interval,
    default_true, DnsConfig, EtcdConfig, FeatureToggles, KubernetesConfig, NetworkingConfig,
    VirtualCluster, VirtualClusterSpec,
};
pub use status::{
    Condition, CredentialRotation, CredentialsStatus, LastOperation, OperationState,
    OperationType, RotationPhase, VirtualClusterStatus,
};
