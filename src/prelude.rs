//! # Prelude
//!
//! Commonly used types, importable with `use virtual_cluster_operator::prelude::*;`.

pub use crate::crd::*;

pub use crate::components::{
    BootstrapDeployer, CredentialStep, DeployContext, DeployError, Deployer,
};

pub use crate::controller::orchestrator::{
    Decision, DefaultFlow, FlowBuilder, Orchestrator, PassError, PassOutcome, Phase,
};
pub use crate::controller::reconciler::{
    reconcile, BackoffState, Reconciler, ReconcilerError, TriggerSource,
};

pub use crate::config::{ControllerConfig, ServerConfig};

pub use crate::credentials::{
    CredentialError, CredentialManager, CredentialStore, InMemoryStore, KubeSecretStore,
};
