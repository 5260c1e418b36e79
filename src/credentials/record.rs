//! # Credential Records
//!
//! The persisted artifact produced by the manager, plus the labels that make
//! records discoverable for rotation and garbage collection.

use std::collections::BTreeMap;
use std::fmt;

use zeroize::Zeroizing;

pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const LABEL_MANAGER_IDENTITY: &str = "manager-identity";
pub const LABEL_NAME: &str = "name";
pub const LABEL_ROTATION_PHASE: &str = "rotation-phase";
pub const LABEL_CHECKSUM: &str = "checksum-of-config";
pub const LABEL_PERSIST: &str = "persist";
pub const LABEL_KIND: &str = "credential-kind";
pub const LABEL_ISSUED_AT: &str = "issued-at";
pub const LABEL_SIGNED_BY: &str = "signed-by";
pub const LABEL_SIGNER_CHECKSUM: &str = "signer-checksum";

/// Value of the `managed-by` label on every record
pub const MANAGED_BY: &str = "secrets-manager";

pub const DATA_CA_CERT: &str = "ca.crt";
pub const DATA_CA_KEY: &str = "ca.key";
pub const DATA_TLS_CERT: &str = "tls.crt";
pub const DATA_TLS_KEY: &str = "tls.key";
pub const DATA_KEY: &str = "key";
pub const DATA_STATIC_TOKENS: &str = "static_tokens.csv";
pub const DATA_KUBECONFIG: &str = "kubeconfig";
pub const DATA_TOKEN: &str = "token";

/// Record payload; values are wiped from memory when dropped
pub type Payload = BTreeMap<String, Zeroizing<Vec<u8>>>;

/// Build a payload from plain byte entries
pub fn payload<K, I>(entries: I) -> Payload
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Vec<u8>)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), Zeroizing::new(v)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    CertificateAuthority,
    Certificate,
    SymmetricKey,
    StaticTokenBundle,
    Kubeconfig,
}

impl CredentialKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::CertificateAuthority => "ca",
            CredentialKind::Certificate => "certificate",
            CredentialKind::SymmetricKey => "symmetric-key",
            CredentialKind::StaticTokenBundle => "static-token",
            CredentialKind::Kubeconfig => "kubeconfig",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ca" => Some(CredentialKind::CertificateAuthority),
            "certificate" => Some(CredentialKind::Certificate),
            "symmetric-key" => Some(CredentialKind::SymmetricKey),
            "static-token" => Some(CredentialKind::StaticTokenBundle),
            "kubeconfig" => Some(CredentialKind::Kubeconfig),
            _ => None,
        }
    }
}

/// Rotation marker of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordPhase {
    /// The live record of its config
    Current,
    /// Retired under `KeepOld` but still trusted
    Old,
    /// Temporary material used until a component has swapped to stable credentials
    Bootstrap,
    /// Replaced by a newer content-addressed record; left for garbage collection
    Superseded,
}

impl RecordPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordPhase::Current => "current",
            RecordPhase::Old => "old",
            RecordPhase::Bootstrap => "bootstrap",
            RecordPhase::Superseded => "superseded",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "current" => Some(RecordPhase::Current),
            "old" => Some(RecordPhase::Old),
            "bootstrap" => Some(RecordPhase::Bootstrap),
            "superseded" => Some(RecordPhase::Superseded),
            _ => None,
        }
    }

    /// Current and bootstrap records are both the live record of their config
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, RecordPhase::Current | RecordPhase::Bootstrap)
    }
}

/// A persisted credential artifact
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub name: String,
    pub namespace: String,
    /// Name of the config that produced this record
    pub config_name: String,
    pub kind: CredentialKind,
    /// Truncated SHA-256 over the content-relevant config fields
    pub checksum: String,
    pub phase: RecordPhase,
    pub persist: bool,
    pub identity: String,
    /// Unix seconds the payload was produced
    pub issued_at: i64,
    /// Record name of the CA that signed a certificate
    pub signed_by: Option<String>,
    /// Checksum of the signer record at issuance
    pub signer_checksum: Option<String>,
    pub data: Payload,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("config_name", &self.config_name)
            .field("kind", &self.kind)
            .field("checksum", &self.checksum)
            .field("phase", &self.phase)
            .field("persist", &self.persist)
            .field("signed_by", &self.signed_by)
            .field("data_keys", &self.data.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CredentialRecord {
    /// Labels written to the backing object
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
            (LABEL_MANAGER_IDENTITY.to_string(), self.identity.clone()),
            (LABEL_NAME.to_string(), self.config_name.clone()),
            (
                LABEL_ROTATION_PHASE.to_string(),
                self.phase.as_str().to_string(),
            ),
            (LABEL_CHECKSUM.to_string(), self.checksum.clone()),
            (LABEL_KIND.to_string(), self.kind.as_str().to_string()),
            (LABEL_ISSUED_AT.to_string(), self.issued_at.to_string()),
        ]);
        if self.persist {
            labels.insert(LABEL_PERSIST.to_string(), "true".to_string());
        }
        if let Some(signer) = &self.signed_by {
            labels.insert(LABEL_SIGNED_BY.to_string(), signer.clone());
        }
        if let Some(checksum) = &self.signer_checksum {
            labels.insert(LABEL_SIGNER_CHECKSUM.to_string(), checksum.clone());
        }
        labels
    }

    /// Rebuild a record from a stored object's labels and payload
    ///
    /// Returns `None` when the object is not a record written by a credential manager.
    #[must_use]
    pub fn from_parts(
        name: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        data: Payload,
    ) -> Option<Self> {
        if labels.get(LABEL_MANAGED_BY).map(String::as_str) != Some(MANAGED_BY) {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            config_name: labels.get(LABEL_NAME)?.clone(),
            kind: CredentialKind::parse(labels.get(LABEL_KIND)?)?,
            checksum: labels.get(LABEL_CHECKSUM)?.clone(),
            phase: RecordPhase::parse(labels.get(LABEL_ROTATION_PHASE)?)?,
            persist: labels.get(LABEL_PERSIST).map(String::as_str) == Some("true"),
            identity: labels.get(LABEL_MANAGER_IDENTITY)?.clone(),
            issued_at: labels
                .get(LABEL_ISSUED_AT)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            signed_by: labels.get(LABEL_SIGNED_BY).cloned(),
            signer_checksum: labels.get(LABEL_SIGNER_CHECKSUM).cloned(),
            data,
        })
    }

    /// Payload entry as UTF-8 text
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Record names are fixed under in-place rotation and content-addressed otherwise
    #[must_use]
    pub fn is_content_addressed(&self) -> bool {
        self.name != self.config_name
    }
}

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects every record written by the manager with the given identity
    #[must_use]
    pub fn managed_by(identity: &str) -> Self {
        Self::new()
            .with(LABEL_MANAGED_BY, MANAGED_BY)
            .with(LABEL_MANAGER_IDENTITY, identity)
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(","))
    }
}
