//! # Controller Manager Phase

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ObjectMeta};
use kube::Client;

use crate::components::apiserver::{internal_url, CLIENT_CA_BUNDLE};
use crate::components::pod::Workload;
use crate::components::{
    apply, DeployContext, DeployError, Deployer, CA_CLIENT, CA_CLUSTER, SERVICE_ACCOUNT_KEY,
};
use crate::credentials::{
    persist, rotate, signed_by_ca, CertificateConfig, CredentialError, CredentialRecord,
    KubeconfigAuth, KubeconfigConfig, RotationMode, DATA_TLS_CERT, DATA_TLS_KEY,
};

pub const CONTROLLER_MANAGER_NAME: &str = "kube-controller-manager";
pub const CLIENT_CERT: &str = "kube-controller-manager-client";
pub const KUBECONFIG: &str = "kube-controller-manager-kubeconfig";

pub struct ControllerManagerDeployer {
    client: Client,
}

impl ControllerManagerDeployer {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, ctx: &DeployContext) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &ctx.namespace)
    }
}

fn missing(name: &str) -> CredentialError {
    CredentialError::SignerNotFound(name.to_string())
}

/// Kubeconfig authenticating with the controller manager's client certificate
async fn issue_kubeconfig(ctx: &DeployContext) -> Result<CredentialRecord, CredentialError> {
    let credentials = &ctx.credentials;
    let cert = credentials
        .generate(
            CertificateConfig::client(CLIENT_CERT, "system:kube-controller-manager"),
            [persist(), rotate(RotationMode::InPlace), signed_by_ca(CA_CLIENT)],
        )
        .await?;
    let (Some(certificate_pem), Some(key_pem)) =
        (cert.data_str(DATA_TLS_CERT), cert.data_str(DATA_TLS_KEY))
    else {
        return Err(CredentialError::invalid(CLIENT_CERT, "certificate payload missing"));
    };
    let ca_bundle = credentials.trust_bundle(CA_CLUSTER).ok_or_else(|| missing(CA_CLUSTER))?;
    credentials
        .generate(
            KubeconfigConfig {
                name: KUBECONFIG.to_string(),
                context_name: CONTROLLER_MANAGER_NAME.to_string(),
                server: internal_url(&ctx.namespace),
                ca_bundle,
                auth: KubeconfigAuth::ClientCertificate {
                    certificate_pem: certificate_pem.to_string(),
                    key_pem: key_pem.to_string(),
                },
            },
            [persist(), rotate(RotationMode::InPlace)],
        )
        .await
}

#[must_use]
pub fn desired_deployment(
    ctx: &DeployContext,
    cluster_ca: &str,
    service_account_key: &str,
) -> Deployment {
    let spec = &ctx.cluster.spec;
    let mut args = vec![
        "--kubeconfig=/srv/kubeconfig/kubeconfig".to_string(),
        "--authentication-kubeconfig=/srv/kubeconfig/kubeconfig".to_string(),
        "--authorization-kubeconfig=/srv/kubeconfig/kubeconfig".to_string(),
        "--leader-elect=true".to_string(),
        "--use-service-account-credentials=true".to_string(),
        "--root-ca-file=/srv/ca-bundle/bundle.crt".to_string(),
        "--cluster-signing-cert-file=/srv/ca/ca.crt".to_string(),
        "--cluster-signing-key-file=/srv/ca/ca.key".to_string(),
        "--service-account-private-key-file=/srv/service-account/ca.key".to_string(),
        format!("--service-cluster-ip-range={}", spec.networking.services),
    ];
    if let Some(pods) = &spec.networking.pods {
        args.push(format!("--cluster-cidr={pods}"));
        args.push("--allocate-node-cidrs=true".to_string());
    }

    let mut deployment = Deployment {
        metadata: apply::owned_metadata(ctx, CONTROLLER_MANAGER_NAME, CONTROLLER_MANAGER_NAME),
        spec: Some(DeploymentSpec {
            replicas: Some(if spec.features.high_availability { 2 } else { 1 }),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    apply::LABEL_COMPONENT.to_string(),
                    CONTROLLER_MANAGER_NAME.to_string(),
                )])),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(apply::component_labels(ctx, CONTROLLER_MANAGER_NAME)),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTROLLER_MANAGER_NAME.to_string(),
                        image: Some(apply::image(
                            &ctx.image_registry,
                            CONTROLLER_MANAGER_NAME,
                            &spec.kubernetes.version,
                        )),
                        command: Some(vec![CONTROLLER_MANAGER_NAME.to_string()]),
                        args: Some(args),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    };

    let secret = |name: &str, secret_name: &str| Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    };
    let volumes = [
        (secret("kubeconfig", KUBECONFIG), "/srv/kubeconfig"),
        (secret("ca", cluster_ca), "/srv/ca"),
        (secret("service-account", service_account_key), "/srv/service-account"),
        (
            Volume {
                name: "ca-bundle".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: CLIENT_CA_BUNDLE.to_string(),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            },
            "/srv/ca-bundle",
        ),
    ];
    let mut workload = Workload::Deployment(&mut deployment);
    for (volume, path) in volumes {
        let mount = VolumeMount {
            name: volume.name.clone(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        };
        workload.add_volume(volume, true);
        workload.add_volume_mount(&[], &mount, true);
    }
    deployment
}

#[async_trait]
impl Deployer for ControllerManagerDeployer {
    fn name(&self) -> &str {
        CONTROLLER_MANAGER_NAME
    }

    async fn deploy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        issue_kubeconfig(ctx).await?;
        let cluster_ca = ctx.credentials.get(CA_CLUSTER).ok_or_else(|| missing(CA_CLUSTER))?;
        let service_account = ctx
            .credentials
            .get(SERVICE_ACCOUNT_KEY)
            .ok_or_else(|| missing(SERVICE_ACCOUNT_KEY))?;
        apply::apply(
            &self.deployments(ctx),
            &desired_deployment(ctx, &cluster_ca.name, &service_account.name),
        )
        .await?;
        Ok(())
    }

    async fn wait(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::wait_deployment(&self.client, &ctx.namespace, CONTROLLER_MANAGER_NAME).await
    }

    async fn destroy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::delete(&self.deployments(ctx), CONTROLLER_MANAGER_NAME).await?;
        Ok(())
    }

    async fn wait_cleanup(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::wait_gone(&self.deployments(ctx), CONTROLLER_MANAGER_NAME).await
    }
}
