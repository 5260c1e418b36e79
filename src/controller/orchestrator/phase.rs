//! # Phases and Flows

use std::fmt;
use std::sync::Arc;

use kube::Client;

use crate::components::{
    AccessBrokerDeployer, ApiServerDeployer, BootstrapDeployer, CertificateAuthorities,
    ControllerManagerDeployer, CredentialStep, Deployer, EtcdDeployer, NamespaceDeployer,
};
use crate::crd::VirtualCluster;

/// One step of a flow
#[derive(Clone)]
pub enum Phase {
    /// Only issues credentials
    Credentials(Arc<dyn CredentialStep>),
    /// `deploy` then `wait`
    Deploy(Arc<dyn Deployer>),
    /// Deploy with bootstrap credentials, wait for the stable ones, then swap
    BootstrapThenSwap(Arc<dyn BootstrapDeployer>),
}

impl Phase {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Phase::Credentials(step) => step.name(),
            Phase::Deploy(deployer) => deployer.name(),
            Phase::BootstrapThenSwap(deployer) => deployer.name(),
        }
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Phase::Credentials(_) => "Credentials",
            Phase::Deploy(_) => "Deploy",
            Phase::BootstrapThenSwap(_) => "BootstrapThenSwap",
        };
        f.debug_tuple(kind).field(&self.name()).finish()
    }
}

/// Produces the ordered phase list for a resource
pub trait FlowBuilder: Send + Sync {
    fn build(&self, cluster: &VirtualCluster) -> Vec<Phase>;
}

/// `namespace → certificate-authorities → etcd → kube-apiserver →
/// access-broker → kube-controller-manager`
#[derive(Clone)]
pub struct DefaultFlow {
    phases: Vec<Phase>,
}

impl DefaultFlow {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            phases: vec![
                Phase::Deploy(Arc::new(NamespaceDeployer::new(client.clone()))),
                Phase::Credentials(Arc::new(CertificateAuthorities)),
                Phase::Deploy(Arc::new(EtcdDeployer::new(client.clone()))),
                Phase::Deploy(Arc::new(ApiServerDeployer::new(client.clone()))),
                Phase::BootstrapThenSwap(Arc::new(AccessBrokerDeployer::new(client.clone()))),
                Phase::Deploy(Arc::new(ControllerManagerDeployer::new(client))),
            ],
        }
    }
}

impl fmt::Debug for DefaultFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultFlow")
            .field("phases", &self.phases)
            .finish()
    }
}

impl FlowBuilder for DefaultFlow {
    fn build(&self, _cluster: &VirtualCluster) -> Vec<Phase> {
        self.phases.clone()
    }
}
