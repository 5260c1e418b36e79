//! # Credential Configs
//!
//! Immutable descriptions of desired credentials. Deployers build these at call
//! time; only the records they produce are persisted.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::credentials::error::CredentialError;
use crate::credentials::record::CredentialKind;

/// Hex digits of the SHA-256 digest kept as the config checksum
///
/// Label values are limited to 63 characters.
pub const CHECKSUM_LEN: usize = 32;

/// Hex digits of the checksum appended to content-addressed record names
pub const NAME_HASH_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CredentialConfig {
    CertificateAuthority(CaConfig),
    Certificate(CertificateConfig),
    SymmetricKey(SymmetricKeyConfig),
    StaticTokenBundle(StaticTokenConfig),
    Kubeconfig(KubeconfigConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaConfig {
    pub name: String,
    pub common_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<Duration>,
}

impl CaConfig {
    #[must_use]
    pub fn new(name: &str, common_name: &str) -> Self {
        Self {
            name: name.to_string(),
            common_name: common_name.to_string(),
            validity: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateUsage {
    Server,
    Client,
    ServerAndClient,
}

impl CertificateUsage {
    #[must_use]
    pub fn is_server(&self) -> bool {
        matches!(
            self,
            CertificateUsage::Server | CertificateUsage::ServerAndClient
        )
    }

    #[must_use]
    pub fn is_client(&self) -> bool {
        matches!(
            self,
            CertificateUsage::Client | CertificateUsage::ServerAndClient
        )
    }
}

/// Leaf certificate; the issuing CA is named with the `SignedByCa` option
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateConfig {
    pub name: String,
    pub common_name: String,
    pub organizations: Vec<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub usage: CertificateUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<Duration>,
}

impl CertificateConfig {
    #[must_use]
    pub fn server(name: &str, common_name: &str) -> Self {
        Self::new(name, common_name, CertificateUsage::Server)
    }

    #[must_use]
    pub fn client(name: &str, common_name: &str) -> Self {
        Self::new(name, common_name, CertificateUsage::Client)
    }

    fn new(name: &str, common_name: &str, usage: CertificateUsage) -> Self {
        Self {
            name: name.to_string(),
            common_name: common_name.to_string(),
            organizations: Vec::new(),
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            usage,
            validity: None,
        }
    }

    #[must_use]
    pub fn with_organizations(mut self, organizations: &[&str]) -> Self {
        self.organizations = organizations.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_dns_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dns_names = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_ip_addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.ip_addresses = addresses;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKeyConfig {
    pub name: String,
    /// Key length in bytes
    pub length: usize,
}

impl SymmetricKeyConfig {
    #[must_use]
    pub fn new(name: &str, length: usize) -> Self {
        Self {
            name: name.to_string(),
            length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSpec {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticTokenConfig {
    pub name: String,
    /// Tokens keyed by a stable id; the id keeps a user's token across regeneration
    pub tokens: BTreeMap<String, TokenSpec>,
}

#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum KubeconfigAuth {
    Token {
        token: String,
    },
    ClientCertificate {
        certificate_pem: String,
        key_pem: String,
    },
}

impl fmt::Debug for KubeconfigAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KubeconfigAuth::Token { .. } => f.write_str("Token(***)"),
            KubeconfigAuth::ClientCertificate { .. } => f.write_str("ClientCertificate(***)"),
        }
    }
}

/// Kubeconfig composed from material issued elsewhere
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigConfig {
    pub name: String,
    pub context_name: String,
    pub server: String,
    /// PEM bundle of every CA the client should trust
    pub ca_bundle: String,
    pub auth: KubeconfigAuth,
}

impl From<CaConfig> for CredentialConfig {
    fn from(config: CaConfig) -> Self {
        CredentialConfig::CertificateAuthority(config)
    }
}

impl From<CertificateConfig> for CredentialConfig {
    fn from(config: CertificateConfig) -> Self {
        CredentialConfig::Certificate(config)
    }
}

impl From<SymmetricKeyConfig> for CredentialConfig {
    fn from(config: SymmetricKeyConfig) -> Self {
        CredentialConfig::SymmetricKey(config)
    }
}

impl From<StaticTokenConfig> for CredentialConfig {
    fn from(config: StaticTokenConfig) -> Self {
        CredentialConfig::StaticTokenBundle(config)
    }
}

impl From<KubeconfigConfig> for CredentialConfig {
    fn from(config: KubeconfigConfig) -> Self {
        CredentialConfig::Kubeconfig(config)
    }
}

impl CredentialConfig {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            CredentialConfig::CertificateAuthority(c) => &c.name,
            CredentialConfig::Certificate(c) => &c.name,
            CredentialConfig::SymmetricKey(c) => &c.name,
            CredentialConfig::StaticTokenBundle(c) => &c.name,
            CredentialConfig::Kubeconfig(c) => &c.name,
        }
    }

    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        match self {
            CredentialConfig::CertificateAuthority(_) => CredentialKind::CertificateAuthority,
            CredentialConfig::Certificate(_) => CredentialKind::Certificate,
            CredentialConfig::SymmetricKey(_) => CredentialKind::SymmetricKey,
            CredentialConfig::StaticTokenBundle(_) => CredentialKind::StaticTokenBundle,
            CredentialConfig::Kubeconfig(_) => CredentialKind::Kubeconfig,
        }
    }

    /// Check that every field required to issue the credential is present
    pub fn validate(&self) -> Result<(), CredentialError> {
        let name = self.name();
        if name.trim().is_empty() {
            return Err(CredentialError::invalid(name, "name must not be empty"));
        }
        // Record names are DNS subdomains with a hash suffix appended
        if name.len() > 253 - NAME_HASH_LEN - 1 {
            return Err(CredentialError::invalid(name, "name is too long"));
        }

        match self {
            CredentialConfig::CertificateAuthority(c) => {
                if c.common_name.trim().is_empty() {
                    return Err(CredentialError::invalid(name, "common name is required"));
                }
            }
            CredentialConfig::Certificate(c) => {
                if c.common_name.trim().is_empty() {
                    return Err(CredentialError::invalid(name, "common name is required"));
                }
                if c.usage.is_server() && c.dns_names.is_empty() && c.ip_addresses.is_empty() {
                    return Err(CredentialError::invalid(
                        name,
                        "server certificates need at least one DNS name or IP address",
                    ));
                }
            }
            CredentialConfig::SymmetricKey(c) => {
                if c.length == 0 {
                    return Err(CredentialError::invalid(name, "key length must be positive"));
                }
            }
            CredentialConfig::StaticTokenBundle(c) => {
                if c.tokens.is_empty() {
                    return Err(CredentialError::invalid(name, "at least one token is required"));
                }
                if let Some((id, _)) = c.tokens.iter().find(|(_, t)| t.username.trim().is_empty())
                {
                    return Err(CredentialError::invalid(
                        name,
                        format!("token '{id}' has no username"),
                    ));
                }
            }
            CredentialConfig::Kubeconfig(c) => {
                if c.server.trim().is_empty() {
                    return Err(CredentialError::invalid(name, "server is required"));
                }
                if c.ca_bundle.trim().is_empty() {
                    return Err(CredentialError::invalid(name, "CA bundle is required"));
                }
                let missing_auth = match &c.auth {
                    KubeconfigAuth::Token { token } => token.is_empty(),
                    KubeconfigAuth::ClientCertificate {
                        certificate_pem,
                        key_pem,
                    } => certificate_pem.is_empty() || key_pem.is_empty(),
                };
                if missing_auth {
                    return Err(CredentialError::invalid(name, "credentials are required"));
                }
            }
        }
        Ok(())
    }

    /// Checksum over the content-relevant fields
    ///
    /// Folds in the signer's checksum so leaves follow their CA, and the rotation
    /// epoch so an operator-triggered rotation yields new material.
    pub fn checksum(
        &self,
        signer_checksum: Option<&str>,
        rotation_epoch: Option<&str>,
    ) -> Result<String, CredentialError> {
        let canonical = serde_json::to_vec(self)
            .map_err(|e| CredentialError::invalid(self.name(), e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        if let Some(signer) = signer_checksum {
            hasher.update(b"\x00signer:");
            hasher.update(signer.as_bytes());
        }
        if let Some(epoch) = rotation_epoch {
            hasher.update(b"\x00epoch:");
            hasher.update(epoch.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        Ok(digest[..CHECKSUM_LEN].to_string())
    }
}

/// Name of a content-addressed record
#[must_use]
pub fn content_addressed_name(config_name: &str, checksum: &str) -> String {
    let hash = checksum.get(..NAME_HASH_LEN).unwrap_or(checksum);
    format!("{config_name}-{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_and_content_sensitive() {
        let a: CredentialConfig = CaConfig::new("ca", "kubernetes").into();
        let b: CredentialConfig = CaConfig::new("ca", "kubernetes-2").into();

        let first = a.checksum(None, None).unwrap();
        assert_eq!(first, a.checksum(None, None).unwrap());
        assert_eq!(first.len(), CHECKSUM_LEN);
        assert_ne!(first, b.checksum(None, None).unwrap());
    }

    #[test]
    fn test_checksum_follows_signer_and_epoch() {
        let leaf: CredentialConfig = CertificateConfig::server("kube-apiserver", "kube-apiserver")
            .with_dns_names(["kubernetes"])
            .into();
        let plain = leaf.checksum(None, None).unwrap();
        assert_ne!(plain, leaf.checksum(Some("abc"), None).unwrap());
        assert_ne!(
            leaf.checksum(Some("abc"), None).unwrap(),
            leaf.checksum(Some("abd"), None).unwrap()
        );
        assert_ne!(plain, leaf.checksum(None, Some("2026-10-17T00:00:00Z")).unwrap());
    }

    #[test]
    fn test_missing_subject_fields_are_rejected() {
        let no_cn: CredentialConfig = CaConfig::new("ca", " ").into();
        assert!(matches!(
            no_cn.validate(),
            Err(CredentialError::InvalidConfig { .. })
        ));

        let no_sans: CredentialConfig = CertificateConfig::server("srv", "srv").into();
        assert!(matches!(
            no_sans.validate(),
            Err(CredentialError::InvalidConfig { .. })
        ));

        let client: CredentialConfig = CertificateConfig::client("cli", "system:admin").into();
        assert!(client.validate().is_ok());

        let empty_tokens: CredentialConfig = StaticTokenConfig {
            name: "tokens".to_string(),
            tokens: BTreeMap::new(),
        }
        .into();
        assert!(empty_tokens.validate().is_err());
    }

    #[test]
    fn test_content_addressed_name_uses_hash_prefix() {
        assert_eq!(
            content_addressed_name("ca", "0123456789abcdef"),
            "ca-01234567"
        );
    }

    #[test]
    fn test_kubeconfig_debug_redacts_credentials() {
        let auth = KubeconfigAuth::Token {
            token: "s3cr3t".to_string(),
        };
        assert_eq!(format!("{auth:?}"), "Token(***)");
    }
}
