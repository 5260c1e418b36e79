//! # Credential Errors

use thiserror::Error;

/// Errors surfaced by the credential lifecycle manager
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Malformed credential request; retrying cannot help until the request changes
    #[error("invalid credential config '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    /// Signer referenced by `SignedByCa` has no current record yet
    #[error("signer '{0}' not found")]
    SignerNotFound(String),

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("PKI error: {0}")]
    Pki(#[from] crate::credentials::pki::PkiError),

    #[error("failed to render kubeconfig '{name}': {source}")]
    Kubeconfig {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl CredentialError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        CredentialError::InvalidConfig {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from a credential store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },

    #[error("record {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    /// Backend object exists but does not carry the labels of a credential record
    #[error("malformed record {namespace}/{name}: {reason}")]
    Malformed {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}
