//! # Certificate Authorities Phase
//!
//! Issues the CA hierarchy every later phase signs against. CAs rotate with
//! `KeepOld` so both generations are trusted until rotation completes.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::components::{CredentialStep, DeployContext, CERTIFICATE_AUTHORITIES};
use crate::credentials::{
    ignore_old_secrets, persist, rotate, CaConfig, CredentialError, GenerateOption, RotationMode,
};

#[derive(Debug, Default)]
pub struct CertificateAuthorities;

/// Config of one CA of the hierarchy
#[must_use]
pub fn ca_config(name: &str, cluster_name: &str) -> CaConfig {
    CaConfig::new(name, &format!("{name}.{cluster_name}"))
}

#[must_use]
pub fn ca_options(retire_old: bool) -> Vec<GenerateOption> {
    let mut options = vec![persist(), rotate(RotationMode::KeepOld)];
    if retire_old {
        options.push(ignore_old_secrets());
    }
    options
}

#[async_trait]
impl CredentialStep for CertificateAuthorities {
    fn name(&self) -> &str {
        "certificate-authorities"
    }

    async fn ensure(&self, ctx: &DeployContext) -> Result<(), CredentialError> {
        let retire_old = ctx.rotation.retire_old_cas();
        for name in CERTIFICATE_AUTHORITIES {
            let record = ctx
                .credentials
                .generate(ca_config(name, ctx.cluster_name()), ca_options(retire_old))
                .await?;
            debug!(
                ca = name,
                record.name = record.name.as_str(),
                namespace = ctx.namespace.as_str(),
                "ca.ensured"
            );
        }
        Ok(())
    }

    async fn teardown(&self, ctx: &DeployContext) -> Result<(), CredentialError> {
        let deleted = ctx.credentials.delete_all().await?;
        info!(
            namespace = ctx.namespace.as_str(),
            deleted = deleted,
            "Deleted credential records"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::GenerateOptions;

    #[test]
    fn test_ca_options_retire_old_only_on_request() {
        let options = GenerateOptions::from_options(ca_options(false));
        assert!(options.persist);
        assert_eq!(options.rotation, Some(RotationMode::KeepOld));
        assert!(!options.ignore_old_secrets);

        assert!(GenerateOptions::from_options(ca_options(true)).ignore_old_secrets);
    }

    #[test]
    fn test_ca_common_name_is_scoped_to_cluster() {
        assert_eq!(ca_config("ca-etcd", "tenant-a").common_name, "ca-etcd.tenant-a");
    }
}
