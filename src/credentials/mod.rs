//! # Credentials
//!
//! Credential lifecycle management for virtual cluster control planes: CA
//! hierarchies, leaf certificates, symmetric keys, static token bundles and
//! kubeconfigs, persisted as labelled records in a [`CredentialStore`].

mod config;
mod error;
mod kubeconfig;
mod manager;
mod options;
pub mod pki;
mod record;
pub mod store;
mod token;

pub use config::{
    content_addressed_name, CaConfig, CertificateConfig, CertificateUsage, CredentialConfig,
    KubeconfigAuth, KubeconfigConfig, StaticTokenConfig, SymmetricKeyConfig, TokenSpec,
    CHECKSUM_LEN, NAME_HASH_LEN,
};
pub use error::{CredentialError, StoreError};
pub use manager::CredentialManager;
pub use options::{
    bootstrap, ignore_old_secrets, persist, rotate, signed_by_ca, signed_by_old_ca,
    GenerateOption, GenerateOptions, RotationMode, SignerRef,
};
pub use record::{
    payload, CredentialKind, CredentialRecord, LabelSelector, Payload, RecordPhase, DATA_CA_CERT,
    DATA_CA_KEY, DATA_KEY, DATA_KUBECONFIG, DATA_STATIC_TOKENS, DATA_TLS_CERT, DATA_TLS_KEY,
    DATA_TOKEN, LABEL_CHECKSUM, LABEL_MANAGED_BY, LABEL_MANAGER_IDENTITY, LABEL_NAME,
    LABEL_PERSIST, LABEL_ROTATION_PHASE, LABEL_SIGNED_BY, LABEL_SIGNER_CHECKSUM, MANAGED_BY,
};
pub use store::{CredentialStore, InMemoryStore, KubeSecretStore};
pub use token::parse_csv as parse_static_tokens;
