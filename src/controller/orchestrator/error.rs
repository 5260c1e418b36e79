//! # Pass Errors

use thiserror::Error;

use crate::components::DeployError;
use crate::controller::resource::ResourceError;
use crate::credentials::CredentialError;

/// Why a reconciliation pass failed
#[derive(Debug, Error)]
pub enum PassError {
    /// The resource cannot be reconciled as written; retried only after a spec change
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("signer {0} not found")]
    SignerNotFound(String),

    #[error("credential phase {phase} failed: {source}")]
    Credential {
        phase: String,
        #[source]
        source: CredentialError,
    },

    #[error("phase {phase} failed: {source:#}")]
    DeployFailed {
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl PassError {
    pub(crate) fn from_credential(phase: &str, error: CredentialError) -> Self {
        match error {
            CredentialError::InvalidConfig { name, reason } => {
                PassError::InvalidConfig(format!("credential {name}: {reason}"))
            }
            CredentialError::SignerNotFound(signer) => PassError::SignerNotFound(signer),
            source => PassError::Credential {
                phase: phase.to_string(),
                source,
            },
        }
    }

    /// Map a deployer error that is not `NotReady`
    pub(crate) fn from_deploy(phase: &str, error: DeployError) -> Self {
        match error {
            DeployError::Credential(e) => Self::from_credential(phase, e),
            DeployError::Failed(source) => PassError::DeployFailed {
                phase: phase.to_string(),
                source,
            },
            DeployError::NotReady(reason) => PassError::DeployFailed {
                phase: phase.to_string(),
                source: anyhow::anyhow!(reason),
            },
        }
    }

    #[must_use]
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, PassError::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StoreError;

    #[test]
    fn test_credential_errors_keep_their_class() {
        let invalid = PassError::from_credential(
            "etcd",
            CredentialError::InvalidConfig {
                name: "etcd-server".to_string(),
                reason: "common name is required".to_string(),
            },
        );
        assert!(invalid.is_invalid_config());
        assert_eq!(
            invalid.to_string(),
            "invalid configuration: credential etcd-server: common name is required"
        );

        let signer =
            PassError::from_credential("etcd", CredentialError::SignerNotFound("ca-etcd".into()));
        assert!(matches!(signer, PassError::SignerNotFound(ref s) if s == "ca-etcd"));

        let store = PassError::from_deploy(
            "etcd",
            DeployError::Credential(CredentialError::Store(StoreError::NotFound {
                namespace: "vc-a".to_string(),
                name: "etcd-server".to_string(),
            })),
        );
        assert!(matches!(store, PassError::Credential { ref phase, .. } if phase == "etcd"));
    }

    #[test]
    fn test_deploy_failure_detail_is_verbatim() {
        let error = PassError::from_deploy(
            "kube-apiserver",
            DeployError::Failed(
                anyhow::anyhow!("admission webhook denied").context("Failed to apply Deployment"),
            ),
        );
        assert_eq!(
            error.to_string(),
            "phase kube-apiserver failed: Failed to apply Deployment: admission webhook denied"
        );
    }
}
