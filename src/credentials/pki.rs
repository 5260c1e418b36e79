//! # PKI
//!
//! CA and leaf certificate issuance with `rcgen`, certificate inspection with
//! `x509-parser`.
//!
//! Certificates are renewed at 80% of their lifetime:
//! - leaf certificates (1 year) after roughly 292 days
//! - CA certificates (10 years) after 8 years

use std::time::Duration;

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use x509_parser::prelude::*;

use crate::credentials::config::{CaConfig, CertificateConfig};

/// Default validity period for CA certificates (10 years)
pub const CA_VALIDITY_DAYS: i64 = 10 * 365;

/// Default validity period for leaf certificates (1 year)
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Fraction of the lifetime after which a certificate is renewed
pub const RENEWAL_THRESHOLD: f64 = 0.80;

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, PkiError>;

/// PEM certificate and private key
#[derive(Clone)]
pub struct KeyMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"***")
            .finish()
    }
}

fn validity_window(
    validity: Option<Duration>,
    default_days: i64,
) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    let lifetime = validity
        .and_then(|v| i64::try_from(v.as_secs()).ok())
        .map_or(::time::Duration::days(default_days), ::time::Duration::seconds);
    (now, now + lifetime)
}

fn distinguished_name(common_name: &str, organizations: &[String]) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    for organization in organizations {
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(organization.clone()),
        );
    }
    dn
}

fn generate_key() -> Result<KeyPair> {
    KeyPair::generate()
        .map_err(|e| PkiError::KeyGenerationFailed(format!("failed to generate key: {e}")))
}

/// Create a self-signed certificate authority
pub fn generate_ca(config: &CaConfig) -> Result<KeyMaterial> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&config.common_name, &[]);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let (not_before, not_after) = validity_window(config.validity, CA_VALIDITY_DAYS);
    params.not_before = not_before;
    params.not_after = not_after;

    let key_pair = generate_key()?;
    let cert = params.self_signed(&key_pair).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!("failed to create CA '{}': {e}", config.name))
    })?;

    Ok(KeyMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

fn subject_alt_names(config: &CertificateConfig) -> Result<Vec<SanType>> {
    let mut sans = Vec::with_capacity(config.dns_names.len() + config.ip_addresses.len());
    for dns_name in &config.dns_names {
        let name = Ia5String::try_from(dns_name.clone()).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("invalid DNS name '{dns_name}': {e}"))
        })?;
        sans.push(SanType::DnsName(name));
    }
    sans.extend(config.ip_addresses.iter().copied().map(SanType::IpAddress));
    Ok(sans)
}

/// Issue a leaf certificate signed by the given CA
pub fn issue_certificate(config: &CertificateConfig, signer: &KeyMaterial) -> Result<KeyMaterial> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&config.common_name, &config.organizations);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    let mut extended = Vec::new();
    if config.usage.is_server() {
        extended.push(ExtendedKeyUsagePurpose::ServerAuth);
    }
    if config.usage.is_client() {
        extended.push(ExtendedKeyUsagePurpose::ClientAuth);
    }
    params.extended_key_usages = extended;
    params.subject_alt_names = subject_alt_names(config)?;

    let (not_before, not_after) = validity_window(config.validity, CERT_VALIDITY_DAYS);
    params.not_before = not_before;
    params.not_after = not_after;

    let key_pair = generate_key()?;
    let ca_key = KeyPair::from_pem(&signer.key_pem)
        .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(&signer.cert_pem, &ca_key)
        .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {e}")))?;

    let cert = params.signed_by(&key_pair, &issuer).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!(
            "failed to sign certificate '{}': {e}",
            config.name
        ))
    })?;

    Ok(KeyMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Parse PEM-encoded data and return the DER bytes of the first block
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let block = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {e}")))?;
    Ok(block.contents().to_vec())
}

/// Validity and subject of an issued certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Unix timestamp the certificate becomes valid
    pub not_before: i64,
    /// Unix timestamp the certificate expires
    pub not_after: i64,
    pub common_name: String,
    pub issuer_common_name: String,
}

impl CertificateInfo {
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {e}")))?;

        let first_cn = |name: &X509Name<'_>| {
            name.iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .unwrap_or("")
                .to_string()
        };

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name: first_cn(cert.subject()),
            issuer_common_name: first_cn(cert.issuer()),
        })
    }

    /// Fraction of the lifetime elapsed at `now` (unix seconds)
    #[must_use]
    pub fn lifetime_fraction(&self, now: i64) -> f64 {
        let lifetime = (self.not_after - self.not_before).max(1);
        #[allow(clippy::cast_precision_loss, reason = "second-level precision suffices")]
        let fraction = (now - self.not_before) as f64 / lifetime as f64;
        fraction
    }

    #[must_use]
    pub fn needs_renewal(&self, now: i64) -> bool {
        self.lifetime_fraction(now) >= RENEWAL_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::config::CertificateUsage;

    fn server_config() -> CertificateConfig {
        CertificateConfig::server("kube-apiserver", "kube-apiserver").with_dns_names([
            "kubernetes",
            "kubernetes.default.svc",
        ])
    }

    #[test]
    fn test_ca_is_self_signed() {
        let ca = generate_ca(&CaConfig::new("ca", "kubernetes")).unwrap();
        let info = CertificateInfo::from_pem(&ca.cert_pem).unwrap();
        assert_eq!(info.common_name, "kubernetes");
        assert_eq!(info.issuer_common_name, "kubernetes");
        assert!(ca.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_leaf_is_issued_by_ca() {
        let ca = generate_ca(&CaConfig::new("ca", "kubernetes")).unwrap();
        let leaf = issue_certificate(&server_config(), &ca).unwrap();
        let info = CertificateInfo::from_pem(&leaf.cert_pem).unwrap();
        assert_eq!(info.common_name, "kube-apiserver");
        assert_eq!(info.issuer_common_name, "kubernetes");
    }

    #[test]
    fn test_custom_validity_is_honoured() {
        let mut config = server_config();
        config.usage = CertificateUsage::ServerAndClient;
        config.validity = Some(Duration::from_secs(3600));
        let ca = generate_ca(&CaConfig::new("ca", "kubernetes")).unwrap();
        let leaf = issue_certificate(&config, &ca).unwrap();
        let info = CertificateInfo::from_pem(&leaf.cert_pem).unwrap();
        assert_eq!(info.not_after - info.not_before, 3600);
    }

    #[test]
    fn test_renewal_threshold() {
        let info = CertificateInfo {
            not_before: 0,
            not_after: 1000,
            common_name: String::new(),
            issuer_common_name: String::new(),
        };
        assert!(!info.needs_renewal(799));
        assert!(info.needs_renewal(800));
    }

    #[test]
    fn test_garbage_pem_is_a_parse_error() {
        assert!(matches!(
            CertificateInfo::from_pem("not a certificate"),
            Err(PkiError::ParseError(_))
        ));
    }
}
