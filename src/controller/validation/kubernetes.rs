//! # Kubernetes Validation
//!
//! RFC 1123 names as used by namespaces and DNS domains.

use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use regex::Regex;

static LABEL_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok());

static SUBDOMAIN_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
});

fn compiled(regex: &'static LazyLock<Option<Regex>>) -> Result<&'static Regex> {
    regex
        .as_ref()
        .ok_or_else(|| anyhow!("Failed to compile name regex"))
}

/// Validate a namespace (RFC 1123 label, 1-63 characters)
pub fn validate_kubernetes_namespace(namespace: &str, field_name: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(anyhow!("{field_name} cannot be empty"));
    }
    if namespace.len() > 63 {
        return Err(anyhow!(
            "{field_name} '{namespace}' exceeds maximum length of 63 characters (got {})",
            namespace.len()
        ));
    }
    if !compiled(&LABEL_REGEX)?.is_match(namespace) {
        return Err(anyhow!(
            "{field_name} '{namespace}' must be a valid Kubernetes namespace (lowercase alphanumeric, hyphens; cannot start/end with hyphen)"
        ));
    }
    Ok(())
}

/// Validate a DNS subdomain (RFC 1123, 1-253 characters)
pub fn validate_dns_subdomain(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("{field_name} cannot be empty"));
    }
    if name.len() > 253 {
        return Err(anyhow!(
            "{field_name} '{name}' exceeds maximum length of 253 characters (got {})",
            name.len()
        ));
    }
    if !compiled(&SUBDOMAIN_REGEX)?.is_match(name) {
        return Err(anyhow!(
            "{field_name} '{name}' must be a valid DNS subdomain (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_kubernetes_namespace() {
        assert!(validate_kubernetes_namespace("vc-tenant-a", "spec.namespace").is_ok());
        assert!(validate_kubernetes_namespace("", "spec.namespace").is_err());
        assert!(validate_kubernetes_namespace("-vc", "spec.namespace").is_err());
        assert!(validate_kubernetes_namespace("vc.tenant", "spec.namespace").is_err());
        assert!(validate_kubernetes_namespace(&"a".repeat(64), "spec.namespace").is_err());
    }

    #[test]
    fn test_validate_dns_subdomain() {
        assert!(validate_dns_subdomain("api.tenant-a.example.com", "spec.dns.domains").is_ok());
        assert!(validate_dns_subdomain("API.example.com", "spec.dns.domains").is_err());
        assert!(validate_dns_subdomain("api..example.com", "spec.dns.domains").is_err());
        let error = validate_dns_subdomain("example.com.", "spec.dns.domains[0]")
            .unwrap_err()
            .to_string();
        assert!(error.starts_with("spec.dns.domains[0] 'example.com.'"));
    }
}
