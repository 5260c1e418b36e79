//! # API Server Phase
//!
//! Issues the serving, kubelet-client and front-proxy certificates, the
//! service account signing key, the static token file and the admin kubeconfig,
//! then runs the virtual API server as a Deployment.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec, Probe, Secret,
    SecretVolumeSource, Service, ServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, ObjectMeta};
use kube::Client;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::components::etcd::{self, ETCD_CLIENT_CERT};
use crate::components::pod::Workload;
use crate::components::{
    apply, DeployContext, DeployError, Deployer, CA_CLIENT, CA_CLUSTER, CA_ETCD, CA_FRONT_PROXY,
    SERVICE_ACCOUNT_KEY, STATIC_TOKEN,
};
use crate::credentials::{
    ignore_old_secrets, parse_static_tokens, persist, rotate, signed_by_ca, signed_by_old_ca,
    CaConfig, CertificateConfig, CredentialError, CredentialRecord, GenerateOption,
    KubeconfigAuth, KubeconfigConfig, RotationMode, StaticTokenConfig, SymmetricKeyConfig,
    TokenSpec, DATA_KEY, DATA_STATIC_TOKENS,
};

pub const APISERVER_NAME: &str = "kube-apiserver";
pub const KUBELET_CLIENT_CERT: &str = "kube-apiserver-kubelet";
pub const AGGREGATOR_CERT: &str = "kube-aggregator";
pub const ENCRYPTION_KEY: &str = "etcd-encryption-key";
pub const ENCRYPTION_CONFIG: &str = "kube-apiserver-encryption-config";
pub const USER_KUBECONFIG: &str = "user-kubeconfig";
pub const CLIENT_CA_BUNDLE: &str = "kube-apiserver-client-ca";
pub const FRONT_PROXY_CA_BUNDLE: &str = "kube-apiserver-front-proxy-ca";
pub const ETCD_CA_BUNDLE: &str = "kube-apiserver-etcd-ca";

/// Token id of the user probing the API server
pub const HEALTH_CHECK_USER: &str = "health-check";
pub const ADMIN_USER: &str = "admin";

pub const SECURE_PORT: i32 = 6443;
pub const CONFIG_CHECKSUM_ANNOTATION: &str = "checksum/kube-apiserver";

const ENCRYPTION_KEY_LENGTH: usize = 32;

pub struct ApiServerDeployer {
    client: Client,
}

impl ApiServerDeployer {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// In-cluster URL of the virtual API server
#[must_use]
pub fn internal_url(namespace: &str) -> String {
    format!("https://{APISERVER_NAME}.{namespace}.svc")
}

/// First usable address of the service CIDR; the `kubernetes` Service gets it
#[must_use]
pub fn first_service_ip(cidr: &str) -> Option<IpAddr> {
    let (network, prefix) = cidr.split_once('/')?;
    let network: Ipv4Addr = network.trim().parse().ok()?;
    let prefix: u32 = prefix.trim().parse().ok()?;
    if prefix >= 31 {
        return None;
    }
    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    let first = (u32::from(network) & mask).checked_add(1)?;
    Some(IpAddr::V4(Ipv4Addr::from(first)))
}

#[must_use]
pub fn server_certificate_config(ctx: &DeployContext) -> CertificateConfig {
    let namespace = &ctx.namespace;
    let mut names: Vec<String> = ctx.cluster.spec.dns.domains.clone();
    names.extend([
        "localhost".to_string(),
        "kubernetes".to_string(),
        "kubernetes.default".to_string(),
        "kubernetes.default.svc".to_string(),
        "kubernetes.default.svc.cluster.local".to_string(),
        APISERVER_NAME.to_string(),
        format!("{APISERVER_NAME}.{namespace}"),
        format!("{APISERVER_NAME}.{namespace}.svc"),
    ]);
    let mut addresses = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
    addresses.extend(first_service_ip(&ctx.cluster.spec.networking.services));
    CertificateConfig::server(APISERVER_NAME, APISERVER_NAME)
        .with_dns_names(names)
        .with_ip_addresses(addresses)
}

#[must_use]
pub fn static_token_config(admin: bool) -> StaticTokenConfig {
    let mut tokens = BTreeMap::from([(
        HEALTH_CHECK_USER.to_string(),
        TokenSpec {
            username: HEALTH_CHECK_USER.to_string(),
            user_id: None,
            groups: Vec::new(),
        },
    )]);
    if admin {
        tokens.insert(
            ADMIN_USER.to_string(),
            TokenSpec {
                username: ADMIN_USER.to_string(),
                user_id: None,
                groups: vec!["system:masters".to_string()],
            },
        );
    }
    StaticTokenConfig {
        name: STATIC_TOKEN.to_string(),
        tokens,
    }
}

/// Keys of the encryption config; the current key encrypts, the old one still decrypts
#[must_use]
pub fn encryption_config(keys: &[&CredentialRecord]) -> serde_json::Value {
    let keys: Vec<serde_json::Value> = keys
        .iter()
        .filter_map(|r| {
            r.data.get(DATA_KEY).map(|key| {
                json!({ "name": r.name, "secret": STANDARD.encode(key.as_slice()) })
            })
        })
        .collect();
    json!({
        "apiVersion": "apiserver.config.k8s.io/v1",
        "kind": "EncryptionConfiguration",
        "resources": [{
            "resources": ["secrets"],
            "providers": [{ "aescbc": { "keys": keys } }, { "identity": {} }],
        }],
    })
}

/// Records the API server workload consumes
#[derive(Debug)]
struct Issued {
    service_account: CredentialRecord,
    service_account_old: Option<CredentialRecord>,
    checksum: String,
}

fn options(extra: impl IntoIterator<Item = GenerateOption>) -> Vec<GenerateOption> {
    let mut options = vec![persist()];
    options.extend(extra);
    options
}

impl ApiServerDeployer {
    async fn issue(&self, ctx: &DeployContext) -> Result<Issued, DeployError> {
        let credentials = &ctx.credentials;
        let in_place = || rotate(RotationMode::InPlace);

        let server = credentials
            .generate(
                server_certificate_config(ctx),
                options([in_place(), signed_by_ca(CA_CLUSTER)]),
            )
            .await?;
        // Kubelets keep trusting the old CA until rotation completes
        let kubelet = credentials
            .generate(
                CertificateConfig::client(KUBELET_CLIENT_CERT, "system:kube-apiserver:kubelet")
                    .with_organizations(&["system:masters"]),
                options([in_place(), signed_by_old_ca(CA_CLUSTER)]),
            )
            .await?;
        let aggregator = credentials
            .generate(
                CertificateConfig::client(AGGREGATOR_CERT, "front-proxy-client"),
                options([in_place(), signed_by_ca(CA_FRONT_PROXY)]),
            )
            .await?;

        let mut sa_options = vec![persist(), rotate(RotationMode::KeepOld)];
        if ctx.rotation.retire_old_service_account_key() {
            sa_options.push(ignore_old_secrets());
        }
        let service_account = credentials
            .generate(
                CaConfig::new(SERVICE_ACCOUNT_KEY, "service-accounts"),
                sa_options,
            )
            .await?;
        let service_account_old = credentials.get_old(SERVICE_ACCOUNT_KEY);

        let encryption = credentials
            .generate(
                SymmetricKeyConfig::new(ENCRYPTION_KEY, ENCRYPTION_KEY_LENGTH),
                options([rotate(RotationMode::KeepOld)]),
            )
            .await?;
        let encryption_old = credentials.get_old(ENCRYPTION_KEY);

        let admin = ctx.cluster.spec.features.static_token_kubeconfig;
        let tokens = credentials
            .generate(static_token_config(admin), options([in_place()]))
            .await?;

        let mut keys = vec![&encryption];
        keys.extend(encryption_old.as_ref());
        let encryption_yaml = serde_yaml::to_string(&encryption_config(&keys))
            .context("Failed to render encryption config")?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::apply(
            &secrets,
            &Secret {
                metadata: apply::owned_metadata(ctx, ENCRYPTION_CONFIG, APISERVER_NAME),
                string_data: Some(BTreeMap::from([(
                    "encryption-config.yaml".to_string(),
                    encryption_yaml,
                )])),
                type_: Some("Opaque".to_string()),
                ..Secret::default()
            },
        )
        .await?;

        if admin {
            let token = tokens
                .data_str(DATA_STATIC_TOKENS)
                .map(parse_static_tokens)
                .and_then(|mut tokens| tokens.remove(ADMIN_USER))
                .ok_or_else(|| CredentialError::invalid(STATIC_TOKEN, "admin token missing"))?;
            let ca_bundle = credentials
                .trust_bundle(CA_CLUSTER)
                .ok_or_else(|| CredentialError::SignerNotFound(CA_CLUSTER.to_string()))?;
            let server = ctx
                .cluster
                .primary_domain()
                .map_or_else(|| internal_url(&ctx.namespace), |d| format!("https://{d}"));
            credentials
                .generate(
                    KubeconfigConfig {
                        name: USER_KUBECONFIG.to_string(),
                        context_name: ctx.cluster_name().to_string(),
                        server,
                        ca_bundle,
                        auth: KubeconfigAuth::Token { token },
                    },
                    options([in_place()]),
                )
                .await?;
        }

        let mut hasher = Sha256::new();
        for record in [&server, &kubelet, &aggregator, &service_account, &encryption, &tokens] {
            hasher.update(record.name.as_bytes());
            hasher.update(record.checksum.as_bytes());
        }
        if let Some(old) = &service_account_old {
            hasher.update(old.name.as_bytes());
        }
        Ok(Issued {
            service_account,
            service_account_old,
            checksum: format!("{:x}", hasher.finalize()),
        })
    }

    async fn apply_ca_bundles(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let bundle = |names: &[&str]| -> Result<String, CredentialError> {
            let mut bundle = String::new();
            for name in names {
                let pem = ctx
                    .credentials
                    .trust_bundle(name)
                    .ok_or_else(|| CredentialError::SignerNotFound((*name).to_string()))?;
                bundle.push_str(&pem);
            }
            Ok(bundle)
        };
        for (config_map, cas) in [
            (CLIENT_CA_BUNDLE, &[CA_CLUSTER, CA_CLIENT][..]),
            (FRONT_PROXY_CA_BUNDLE, &[CA_FRONT_PROXY][..]),
            (ETCD_CA_BUNDLE, &[CA_ETCD][..]),
        ] {
            apply::apply_ca_bundle(&self.client, ctx, config_map, APISERVER_NAME, bundle(cas)?)
                .await?;
        }
        Ok(())
    }
}

fn replicas(ctx: &DeployContext) -> i32 {
    if ctx.cluster.spec.features.high_availability {
        2
    } else {
        1
    }
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn arguments(ctx: &DeployContext, has_old_service_account_key: bool) -> Vec<String> {
    let spec = &ctx.cluster.spec;
    let mut args = vec![
        format!("--etcd-servers={}", etcd::client_url(&ctx.namespace)),
        "--etcd-cafile=/srv/etcd-ca/bundle.crt".to_string(),
        "--etcd-certfile=/srv/etcd-client/tls.crt".to_string(),
        "--etcd-keyfile=/srv/etcd-client/tls.key".to_string(),
        format!("--secure-port={SECURE_PORT}"),
        "--tls-cert-file=/srv/tls/tls.crt".to_string(),
        "--tls-private-key-file=/srv/tls/tls.key".to_string(),
        "--client-ca-file=/srv/client-ca/bundle.crt".to_string(),
        "--kubelet-client-certificate=/srv/kubelet/tls.crt".to_string(),
        "--kubelet-client-key=/srv/kubelet/tls.key".to_string(),
        "--requestheader-client-ca-file=/srv/front-proxy-ca/bundle.crt".to_string(),
        "--requestheader-allowed-names=front-proxy-client".to_string(),
        "--requestheader-username-headers=X-Remote-User".to_string(),
        "--requestheader-group-headers=X-Remote-Group".to_string(),
        "--proxy-client-cert-file=/srv/aggregator/tls.crt".to_string(),
        "--proxy-client-key-file=/srv/aggregator/tls.key".to_string(),
        "--service-account-signing-key-file=/srv/service-account/ca.key".to_string(),
        "--service-account-key-file=/srv/service-account/ca.key".to_string(),
        format!("--service-account-issuer={}", internal_url(&ctx.namespace)),
        format!("--service-cluster-ip-range={}", spec.networking.services),
        "--token-auth-file=/srv/static-token/static_tokens.csv".to_string(),
        "--encryption-provider-config=/srv/encryption/encryption-config.yaml".to_string(),
        "--authorization-mode=Node,RBAC".to_string(),
        "--allow-privileged=true".to_string(),
    ];
    if has_old_service_account_key {
        args.push("--service-account-key-file=/srv/service-account-old/ca.key".to_string());
    }
    args
}

fn desired_deployment(ctx: &DeployContext, issued: &Issued) -> Deployment {
    let selector = BTreeMap::from([(
        apply::LABEL_COMPONENT.to_string(),
        APISERVER_NAME.to_string(),
    )]);
    let container = Container {
        name: APISERVER_NAME.to_string(),
        image: Some(apply::image(
            &ctx.image_registry,
            APISERVER_NAME,
            &ctx.cluster.spec.kubernetes.version,
        )),
        command: Some(vec![APISERVER_NAME.to_string()]),
        args: Some(arguments(ctx, issued.service_account_old.is_some())),
        ports: Some(vec![ContainerPort {
            name: Some("https".to_string()),
            container_port: SECURE_PORT,
            ..ContainerPort::default()
        }]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(SECURE_PORT),
                ..TCPSocketAction::default()
            }),
            period_seconds: Some(5),
            ..Probe::default()
        }),
        ..Container::default()
    };

    let mut deployment = Deployment {
        metadata: apply::owned_metadata(ctx, APISERVER_NAME, APISERVER_NAME),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas(ctx)),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(apply::component_labels(ctx, APISERVER_NAME)),
                    annotations: Some(BTreeMap::from([(
                        CONFIG_CHECKSUM_ANNOTATION.to_string(),
                        issued.checksum.clone(),
                    )])),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    };

    let mut mounts: Vec<(Volume, &str)> = vec![
        (secret_volume("tls", APISERVER_NAME), "/srv/tls"),
        (secret_volume("kubelet", KUBELET_CLIENT_CERT), "/srv/kubelet"),
        (secret_volume("aggregator", AGGREGATOR_CERT), "/srv/aggregator"),
        (secret_volume("etcd-client", ETCD_CLIENT_CERT), "/srv/etcd-client"),
        (
            secret_volume("service-account", &issued.service_account.name),
            "/srv/service-account",
        ),
        (secret_volume("static-token", STATIC_TOKEN), "/srv/static-token"),
        (secret_volume("encryption", ENCRYPTION_CONFIG), "/srv/encryption"),
        (config_map_volume("client-ca", CLIENT_CA_BUNDLE), "/srv/client-ca"),
        (config_map_volume("front-proxy-ca", FRONT_PROXY_CA_BUNDLE), "/srv/front-proxy-ca"),
        (config_map_volume("etcd-ca", ETCD_CA_BUNDLE), "/srv/etcd-ca"),
    ];
    if let Some(old) = &issued.service_account_old {
        mounts.push((
            secret_volume("service-account-old", &old.name),
            "/srv/service-account-old",
        ));
    }

    let mut workload = Workload::Deployment(&mut deployment);
    for (volume, path) in mounts {
        let mount = VolumeMount {
            name: volume.name.clone(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        };
        workload.add_volume(volume, true);
        workload.add_volume_mount(&[APISERVER_NAME], &mount, true);
    }
    deployment
}

fn desired_service(ctx: &DeployContext) -> Service {
    Service {
        metadata: apply::owned_metadata(ctx, APISERVER_NAME, APISERVER_NAME),
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                apply::LABEL_COMPONENT.to_string(),
                APISERVER_NAME.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: 443,
                target_port: Some(IntOrString::Int(SECURE_PORT)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

#[async_trait]
impl Deployer for ApiServerDeployer {
    fn name(&self) -> &str {
        APISERVER_NAME
    }

    async fn deploy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let issued = self.issue(ctx).await?;
        self.apply_ca_bundles(ctx).await?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::apply(&services, &desired_service(ctx)).await?;
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::apply(&deployments, &desired_deployment(ctx, &issued)).await?;
        Ok(())
    }

    async fn wait(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::wait_deployment(&self.client, &ctx.namespace, APISERVER_NAME).await
    }

    async fn destroy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::delete(&deployments, APISERVER_NAME).await?;
        let services: Api<Service> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::delete(&services, APISERVER_NAME).await?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::delete(&secrets, ENCRYPTION_CONFIG).await?;
        Ok(())
    }

    async fn wait_cleanup(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::wait_gone(&deployments, APISERVER_NAME).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{payload, CredentialKind, RecordPhase};

    #[test]
    fn test_first_service_ip() {
        assert_eq!(
            first_service_ip("100.64.0.0/13"),
            Some(IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1)))
        );
        assert_eq!(
            first_service_ip("10.96.12.0/12"),
            Some(IpAddr::V4(Ipv4Addr::new(10, 96, 0, 1)))
        );
        assert_eq!(first_service_ip("10.0.0.0/32"), None);
        assert_eq!(first_service_ip("not-a-cidr"), None);
    }

    #[test]
    fn test_static_token_config_adds_admin_on_request() {
        assert_eq!(static_token_config(false).tokens.len(), 1);
        let tokens = static_token_config(true).tokens;
        assert_eq!(tokens[ADMIN_USER].groups, vec!["system:masters".to_string()]);
    }

    #[test]
    fn test_encryption_config_lists_current_key_first() {
        let record = |name: &str, key: &[u8]| CredentialRecord {
            name: name.to_string(),
            namespace: "vc-a".to_string(),
            config_name: ENCRYPTION_KEY.to_string(),
            kind: CredentialKind::SymmetricKey,
            checksum: "0".repeat(32),
            phase: RecordPhase::Current,
            persist: true,
            identity: "test".to_string(),
            issued_at: 0,
            signed_by: None,
            signer_checksum: None,
            data: payload([(DATA_KEY, key.to_vec())]),
        };
        let current = record("etcd-encryption-key-bbbbbbbb", b"new");
        let old = record("etcd-encryption-key-aaaaaaaa", b"old");
        let config = encryption_config(&[&current, &old]);
        let keys = &config["resources"][0]["providers"][0]["aescbc"]["keys"];
        assert_eq!(keys[0]["name"], "etcd-encryption-key-bbbbbbbb");
        assert_eq!(keys[0]["secret"], "bmV3");
        assert_eq!(keys[1]["name"], "etcd-encryption-key-aaaaaaaa");
    }
}
