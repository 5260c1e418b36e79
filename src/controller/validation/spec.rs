//! # VirtualCluster Validation

use std::net::Ipv4Addr;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use regex::Regex;

use super::duration::validate_duration_interval;
use super::kubernetes::{validate_dns_subdomain, validate_kubernetes_namespace};
use crate::constants::MIN_SYNC_INTERVAL_SECS;
use crate::crd::VirtualCluster;

static VERSION_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^v?\d+\.\d+\.\d+$").ok());

/// Resync interval of a resource
pub fn sync_interval(cluster: &VirtualCluster) -> Result<Duration> {
    validate_duration_interval(
        &cluster.spec.sync_interval,
        "spec.syncInterval",
        MIN_SYNC_INTERVAL_SECS,
    )
}

fn validate_cidr(cidr: &str, field_name: &str) -> Result<()> {
    let (network, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| anyhow!("{field_name} '{cidr}' must be a CIDR (e.g. 100.64.0.0/13)"))?;
    network
        .parse::<Ipv4Addr>()
        .map_err(|e| anyhow!("{field_name} '{cidr}' has an invalid network address: {e}"))?;
    match prefix.parse::<u8>() {
        Ok(prefix) if (8..=30).contains(&prefix) => Ok(()),
        _ => Err(anyhow!(
            "{field_name} '{cidr}' must have a prefix length between 8 and 30"
        )),
    }
}

/// Check every field a pass relies on; the error names the offending field
pub fn validate_virtual_cluster(cluster: &VirtualCluster) -> Result<Duration> {
    let spec = &cluster.spec;

    if let Some(namespace) = &spec.namespace {
        validate_kubernetes_namespace(namespace, "spec.namespace")?;
    } else {
        validate_kubernetes_namespace(&cluster.target_namespace(), "metadata.name")?;
    }

    let version = spec.kubernetes.version.trim();
    let version_regex = VERSION_REGEX
        .as_ref()
        .ok_or_else(|| anyhow!("Failed to compile version regex"))?;
    if !version_regex.is_match(version) {
        return Err(anyhow!(
            "spec.kubernetes.version '{version}' must be a semantic version (e.g. 1.30.4)"
        ));
    }

    validate_cidr(&spec.networking.services, "spec.networking.services")?;
    if let Some(pods) = &spec.networking.pods {
        validate_cidr(pods, "spec.networking.pods")?;
    }

    if spec.dns.domains.is_empty() {
        return Err(anyhow!("spec.dns.domains must contain at least one domain"));
    }
    for (i, domain) in spec.dns.domains.iter().enumerate() {
        validate_dns_subdomain(domain, &format!("spec.dns.domains[{i}]"))?;
    }

    let replicas = spec.etcd.replicas;
    if replicas < 1 || replicas % 2 == 0 {
        return Err(anyhow!(
            "spec.etcd.replicas must be a positive odd number (got {replicas})"
        ));
    }

    sync_interval(cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DnsConfig, KubernetesConfig, NetworkingConfig, VirtualClusterSpec};

    fn cluster() -> VirtualCluster {
        VirtualCluster::new(
            "tenant-a",
            VirtualClusterSpec {
                namespace: None,
                zones: vec!["eu-west-1a".to_string()],
                kubernetes: KubernetesConfig {
                    version: "1.30.4".to_string(),
                },
                networking: NetworkingConfig {
                    services: "100.64.0.0/13".to_string(),
                    pods: Some("100.96.0.0/11".to_string()),
                },
                dns: DnsConfig {
                    domains: vec!["api.tenant-a.example.com".to_string()],
                },
                etcd: Default::default(),
                features: Default::default(),
                sync_interval: "5m".to_string(),
            },
        )
    }

    #[test]
    fn test_valid_cluster_yields_sync_interval() {
        assert_eq!(
            validate_virtual_cluster(&cluster()).unwrap(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_rejects_bad_fields() {
        let mut bad_version = cluster();
        bad_version.spec.kubernetes.version = "latest".to_string();
        assert!(validate_virtual_cluster(&bad_version)
            .unwrap_err()
            .to_string()
            .contains("spec.kubernetes.version"));

        let mut bad_cidr = cluster();
        bad_cidr.spec.networking.services = "100.64.0.0".to_string();
        assert!(validate_virtual_cluster(&bad_cidr).is_err());

        let mut no_domains = cluster();
        no_domains.spec.dns.domains.clear();
        assert!(validate_virtual_cluster(&no_domains).is_err());

        let mut even = cluster();
        even.spec.etcd.replicas = 2;
        assert!(validate_virtual_cluster(&even)
            .unwrap_err()
            .to_string()
            .contains("odd"));

        let mut too_fast = cluster();
        too_fast.spec.sync_interval = "10s".to_string();
        assert!(validate_virtual_cluster(&too_fast).is_err());
    }
}
