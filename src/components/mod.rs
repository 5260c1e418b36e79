//! # Components
//!
//! Deployers for the control plane components of a virtual cluster.
//!
//! Every deployer exposes non-blocking operations: `deploy` applies the desired
//! objects, `wait` probes observed health once and returns
//! [`DeployError::NotReady`] when the component is not there yet. Polling happens
//! by re-entering the reconciliation on requeue.
//!
//! ## Module Structure
//!
//! - `apply.rs` - Server-side apply and probe helpers
//! - `health.rs` - Pure health checks over workload status
//! - `pod.rs` - Pod spec mutation helpers
//! - `namespace.rs`, `certificate_authorities.rs`, `etcd.rs`, `apiserver.rs`,
//!   `access_broker.rs`, `controller_manager.rs` - One module per flow phase

pub mod access_broker;
pub mod apiserver;
pub mod apply;
pub mod certificate_authorities;
pub mod controller_manager;
pub mod etcd;
pub mod health;
pub mod namespace;
pub mod pod;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::credentials::{CredentialError, CredentialManager};
use crate::crd::{RotationPhase, VirtualCluster};

pub use access_broker::AccessBrokerDeployer;
pub use apiserver::ApiServerDeployer;
pub use certificate_authorities::CertificateAuthorities;
pub use controller_manager::ControllerManagerDeployer;
pub use etcd::EtcdDeployer;
pub use namespace::NamespaceDeployer;

/// Root CA of the virtual cluster
pub const CA_CLUSTER: &str = "ca";
pub const CA_ETCD: &str = "ca-etcd";
pub const CA_FRONT_PROXY: &str = "ca-front-proxy";
pub const CA_CLIENT: &str = "ca-client";
/// Every CA of the hierarchy, issued by the certificate-authorities phase
pub const CERTIFICATE_AUTHORITIES: [&str; 4] = [CA_CLUSTER, CA_ETCD, CA_FRONT_PROXY, CA_CLIENT];

pub const SERVICE_ACCOUNT_KEY: &str = "service-account-key";
pub const STATIC_TOKEN: &str = "static-token";

#[derive(Debug, Error)]
pub enum DeployError {
    /// The component is converging; requeue and probe again
    #[error("{0}")]
    NotReady(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Credential rotation phases the pass is running under
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationContext {
    pub certificate_authorities: Option<RotationPhase>,
    pub service_account_key: Option<RotationPhase>,
}

impl RotationContext {
    /// Old CAs are retired once rotation completion was requested
    #[must_use]
    pub fn retire_old_cas(&self) -> bool {
        self.certificate_authorities == Some(RotationPhase::Completing)
    }

    #[must_use]
    pub fn retire_old_service_account_key(&self) -> bool {
        self.service_account_key == Some(RotationPhase::Completing)
    }
}

/// Inputs shared by every phase of a pass
#[derive(Debug, Clone)]
pub struct DeployContext {
    pub cluster: Arc<VirtualCluster>,
    /// Namespace hosting the components and the credential records
    pub namespace: String,
    pub credentials: Arc<CredentialManager>,
    pub rotation: RotationContext,
    pub image_registry: String,
}

impl DeployContext {
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        self.cluster.metadata.name.as_deref().unwrap_or_default()
    }
}

/// A control plane component with an idempotent deploy and a health probe
#[async_trait]
pub trait Deployer: Send + Sync {
    fn name(&self) -> &str;

    /// Apply the desired objects; safe to call on every pass
    async fn deploy(&self, ctx: &DeployContext) -> Result<(), DeployError>;

    /// Probe health once
    async fn wait(&self, ctx: &DeployContext) -> Result<(), DeployError>;

    async fn destroy(&self, ctx: &DeployContext) -> Result<(), DeployError>;

    /// Probe once whether everything `destroy` removed is gone
    async fn wait_cleanup(&self, ctx: &DeployContext) -> Result<(), DeployError>;
}

/// A component that first runs with temporary credentials and swaps to stable
/// ones once it has obtained them
#[async_trait]
pub trait BootstrapDeployer: Deployer {
    async fn deploy_bootstrap(&self, ctx: &DeployContext) -> Result<(), DeployError>;

    /// `Ok` once the stable credential has been produced
    async fn wait_bootstrap(&self, ctx: &DeployContext) -> Result<(), DeployError>;

    /// Discard bootstrap material after the swap
    async fn finish_bootstrap(&self, ctx: &DeployContext) -> Result<(), DeployError>;
}

/// A phase that only issues credentials
#[async_trait]
pub trait CredentialStep: Send + Sync {
    fn name(&self) -> &str;

    async fn ensure(&self, ctx: &DeployContext) -> Result<(), CredentialError>;

    async fn teardown(&self, ctx: &DeployContext) -> Result<(), CredentialError>;
}
