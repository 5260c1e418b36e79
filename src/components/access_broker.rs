//! # Access Broker Phase
//!
//! The access broker reaches the virtual API server with a service account
//! token it keeps renewed in an access Secret. The token does not exist before
//! the broker first runs, so the broker starts with a short-lived bootstrap
//! kubeconfig and is redeployed once the access Secret carries a renewed token.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, Secret, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ObjectMeta};
use kube::Client;
use tracing::{debug, info};

use crate::components::apiserver::internal_url;
use crate::components::pod::Workload;
use crate::components::{
    apply, BootstrapDeployer, DeployContext, DeployError, Deployer, CA_CLIENT, CA_CLUSTER,
};
use crate::credentials::{
    bootstrap, persist, signed_by_ca, CertificateConfig, CredentialError, KubeconfigAuth,
    KubeconfigConfig, DATA_KUBECONFIG, DATA_TLS_CERT, DATA_TLS_KEY,
};

pub const ACCESS_BROKER_NAME: &str = "access-broker";
pub const BOOTSTRAP_CERT: &str = "access-broker-bootstrap-cert";
pub const BOOTSTRAP_KUBECONFIG: &str = "access-broker-bootstrap";
/// Secret the broker keeps a renewed token in
pub const ACCESS_SECRET: &str = "access-broker-token";
/// Set by the broker whenever it renewed the token in the access Secret
pub const TOKEN_RENEW_ANNOTATION: &str = "operator.octopilot.io/token-renew-timestamp";
const ACCESS_BROKER_IMAGE: &str = "octopilot/access-broker";
const ACCESS_BROKER_VERSION: &str = "0.4.0";

pub struct AccessBrokerDeployer {
    client: Client,
}

impl AccessBrokerDeployer {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, ctx: &DeployContext) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &ctx.namespace)
    }

    fn deployments(&self, ctx: &DeployContext) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &ctx.namespace)
    }
}

/// Whether the access Secret holds a token the broker renewed
#[must_use]
pub fn token_renewed(secret: &Secret) -> bool {
    let renewed = secret
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.get(TOKEN_RENEW_ANNOTATION).is_some_and(|v| !v.is_empty()));
    let has_token = secret
        .data
        .as_ref()
        .and_then(|d| d.get("token"))
        .is_some_and(|t| !t.0.is_empty());
    renewed && has_token
}

/// Access Secret placeholder; the broker fills in the token
#[must_use]
pub fn access_secret(ctx: &DeployContext) -> Secret {
    Secret {
        metadata: apply::owned_metadata(ctx, ACCESS_SECRET, ACCESS_BROKER_NAME),
        type_: Some("Opaque".to_string()),
        ..Secret::default()
    }
}

/// Broker Deployment reading its kubeconfig from `kubeconfig_secret`
#[must_use]
pub fn desired_deployment(ctx: &DeployContext, kubeconfig_secret: &str, key: &str) -> Deployment {
    let selector = BTreeMap::from([(
        apply::LABEL_COMPONENT.to_string(),
        ACCESS_BROKER_NAME.to_string(),
    )]);
    let mut deployment = Deployment {
        metadata: apply::owned_metadata(ctx, ACCESS_BROKER_NAME, ACCESS_BROKER_NAME),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(apply::component_labels(ctx, ACCESS_BROKER_NAME)),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: ACCESS_BROKER_NAME.to_string(),
                        image: Some(format!(
                            "{}/{ACCESS_BROKER_IMAGE}:v{ACCESS_BROKER_VERSION}",
                            ctx.image_registry.trim_end_matches('/')
                        )),
                        args: Some(vec![
                            format!("--access-secret={}/{ACCESS_SECRET}", ctx.namespace),
                            format!("--server={}", internal_url(&ctx.namespace)),
                        ]),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    };

    let mut workload = Workload::Deployment(&mut deployment);
    workload.add_volume(
        Volume {
            name: "kubeconfig".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(kubeconfig_secret.to_string()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        },
        true,
    );
    workload.add_volume_mount(
        &[ACCESS_BROKER_NAME],
        &VolumeMount {
            name: "kubeconfig".to_string(),
            mount_path: "/srv/kubeconfig".to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        },
        true,
    );
    workload.add_env_var(
        &[ACCESS_BROKER_NAME],
        &EnvVar {
            name: "KUBECONFIG_PATH".to_string(),
            value: Some(format!("/srv/kubeconfig/{key}")),
            ..EnvVar::default()
        },
        true,
    );
    deployment
}

#[async_trait]
impl Deployer for AccessBrokerDeployer {
    fn name(&self) -> &str {
        ACCESS_BROKER_NAME
    }

    async fn deploy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::apply(
            &self.deployments(ctx),
            &desired_deployment(ctx, ACCESS_SECRET, "token"),
        )
        .await?;
        Ok(())
    }

    async fn wait(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::wait_deployment(&self.client, &ctx.namespace, ACCESS_BROKER_NAME).await
    }

    async fn destroy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::delete(&self.deployments(ctx), ACCESS_BROKER_NAME).await?;
        apply::delete(&self.secrets(ctx), ACCESS_SECRET).await?;
        Ok(())
    }

    async fn wait_cleanup(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::wait_gone(&self.deployments(ctx), ACCESS_BROKER_NAME).await?;
        apply::wait_gone(&self.secrets(ctx), ACCESS_SECRET).await
    }
}

#[async_trait]
impl BootstrapDeployer for AccessBrokerDeployer {
    async fn deploy_bootstrap(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let credentials = &ctx.credentials;
        let cert = credentials
            .generate(
                CertificateConfig::client(BOOTSTRAP_CERT, "system:access-broker:bootstrap")
                    .with_organizations(&["system:access-brokers"]),
                [persist(), bootstrap(), signed_by_ca(CA_CLIENT)],
            )
            .await?;
        let (Some(certificate_pem), Some(key_pem)) =
            (cert.data_str(DATA_TLS_CERT), cert.data_str(DATA_TLS_KEY))
        else {
            return Err(
                CredentialError::invalid(BOOTSTRAP_CERT, "certificate payload missing").into(),
            );
        };
        let ca_bundle = credentials
            .trust_bundle(CA_CLUSTER)
            .ok_or_else(|| CredentialError::SignerNotFound(CA_CLUSTER.to_string()))?;
        let kubeconfig = credentials
            .generate(
                KubeconfigConfig {
                    name: BOOTSTRAP_KUBECONFIG.to_string(),
                    context_name: ACCESS_BROKER_NAME.to_string(),
                    server: internal_url(&ctx.namespace),
                    ca_bundle,
                    auth: KubeconfigAuth::ClientCertificate {
                        certificate_pem: certificate_pem.to_string(),
                        key_pem: key_pem.to_string(),
                    },
                },
                [persist(), bootstrap()],
            )
            .await?;

        let secrets = self.secrets(ctx);
        if secrets
            .get_opt(ACCESS_SECRET)
            .await
            .context("Failed to read access secret")?
            .is_none()
        {
            apply::apply(&secrets, &access_secret(ctx)).await?;
        }
        apply::apply(
            &self.deployments(ctx),
            &desired_deployment(ctx, &kubeconfig.name, DATA_KUBECONFIG),
        )
        .await?;
        info!(
            namespace = ctx.namespace.as_str(),
            kubeconfig = kubeconfig.name.as_str(),
            "Deployed access broker with bootstrap credentials"
        );
        Ok(())
    }

    async fn wait_bootstrap(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let secret = self
            .secrets(ctx)
            .get_opt(ACCESS_SECRET)
            .await
            .context("Failed to read access secret")?;
        match secret {
            Some(secret) if token_renewed(&secret) => Ok(()),
            Some(_) => Err(DeployError::NotReady(format!(
                "access secret {ACCESS_SECRET} has no renewed token yet"
            ))),
            None => Err(DeployError::NotReady(format!(
                "access secret {ACCESS_SECRET} not found"
            ))),
        }
    }

    async fn finish_bootstrap(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        for config in [BOOTSTRAP_KUBECONFIG, BOOTSTRAP_CERT] {
            ctx.credentials.discard(config).await?;
        }
        debug!(namespace = ctx.namespace.as_str(), "access-broker.bootstrap.discarded");
        Ok(())
    }
}
