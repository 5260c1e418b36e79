//! # Datastore Phase
//!
//! etcd as a StatefulSet behind a headless Service, serving TLS with
//! certificates signed by the `ca-etcd` CA.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector,
    PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ObjectMeta};
use kube::Client;

use crate::components::pod::{self, Workload};
use crate::components::{apply, DeployContext, DeployError, Deployer, CA_ETCD};
use crate::credentials::{
    persist, rotate, signed_by_ca, CertificateConfig, CredentialError, RotationMode,
};

pub const ETCD_NAME: &str = "etcd";
pub const ETCD_SERVER_CERT: &str = "etcd-server";
pub const ETCD_CLIENT_CERT: &str = "etcd-client";
pub const ETCD_CA_BUNDLE: &str = "etcd-ca-bundle";
pub const CLIENT_PORT: i32 = 2379;
const PEER_PORT: i32 = 2380;
const ETCD_IMAGE: &str = "etcd";
const ETCD_VERSION: &str = "3.5.15-0";

/// Annotation rolling the pods when their serving certificate changes
pub const CERT_CHECKSUM_ANNOTATION: &str = "checksum/etcd-server";

pub struct EtcdDeployer {
    client: Client,
}

impl EtcdDeployer {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// In-cluster client URL of the datastore
#[must_use]
pub fn client_url(namespace: &str) -> String {
    format!("https://{ETCD_NAME}-client.{namespace}.svc:{CLIENT_PORT}")
}

#[must_use]
pub fn server_certificate_config(namespace: &str) -> CertificateConfig {
    let names = [
        "localhost".to_string(),
        format!("{ETCD_NAME}-client"),
        format!("{ETCD_NAME}-client.{namespace}.svc"),
        format!("*.{ETCD_NAME}.{namespace}.svc"),
        format!("{ETCD_NAME}-client.{namespace}.svc.cluster.local"),
    ];
    CertificateConfig::server(ETCD_SERVER_CERT, ETCD_NAME).with_dns_names(names)
}

#[must_use]
pub fn client_certificate_config() -> CertificateConfig {
    CertificateConfig::client(ETCD_CLIENT_CERT, "etcd-client")
}

fn selector_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(apply::LABEL_COMPONENT.to_string(), ETCD_NAME.to_string())])
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

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..VolumeMount::default()
    }
}

#[must_use]
pub fn desired_services(ctx: &DeployContext) -> Vec<Service> {
    let port = |name: &str, port: i32| ServicePort {
        name: Some(name.to_string()),
        port,
        ..ServicePort::default()
    };
    let headless = Service {
        metadata: apply::owned_metadata(ctx, ETCD_NAME, ETCD_NAME),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels()),
            ports: Some(vec![port("client", CLIENT_PORT), port("peer", PEER_PORT)]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    };
    let client = Service {
        metadata: apply::owned_metadata(ctx, &format!("{ETCD_NAME}-client"), ETCD_NAME),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels()),
            ports: Some(vec![port("client", CLIENT_PORT)]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    };
    vec![headless, client]
}

#[must_use]
pub fn desired_statefulset(ctx: &DeployContext, server_checksum: &str) -> StatefulSet {
    let etcd = &ctx.cluster.spec.etcd;
    let peers: Vec<String> = (0..etcd.replicas)
        .map(|i| {
            format!(
                "{ETCD_NAME}-{i}=https://{ETCD_NAME}-{i}.{ETCD_NAME}.{}.svc:{PEER_PORT}",
                ctx.namespace
            )
        })
        .collect();
    let container = Container {
        name: ETCD_NAME.to_string(),
        image: Some(apply::image(&ctx.image_registry, ETCD_IMAGE, ETCD_VERSION)),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-ec".to_string(),
            [
                "exec etcd --name=${POD_NAME} --data-dir=/var/lib/etcd",
                "--listen-client-urls=https://0.0.0.0:2379",
                "--advertise-client-urls=https://${POD_NAME}.etcd.${POD_NAMESPACE}.svc:2379",
                "--listen-peer-urls=https://0.0.0.0:2380",
                "--initial-advertise-peer-urls=https://${POD_NAME}.etcd.${POD_NAMESPACE}.svc:2380",
                &format!("--initial-cluster={}", peers.join(",")),
                "--client-cert-auth --trusted-ca-file=/srv/etcd/ca/bundle.crt",
                "--cert-file=/srv/etcd/server/tls.crt --key-file=/srv/etcd/server/tls.key",
                "--peer-client-cert-auth --peer-trusted-ca-file=/srv/etcd/ca/bundle.crt",
                "--peer-cert-file=/srv/etcd/server/tls.crt --peer-key-file=/srv/etcd/server/tls.key",
            ]
            .join(" "),
        ]),
        ports: Some(vec![
            ContainerPort {
                name: Some("client".to_string()),
                container_port: CLIENT_PORT,
                ..ContainerPort::default()
            },
            ContainerPort {
                name: Some("peer".to_string()),
                container_port: PEER_PORT,
                ..ContainerPort::default()
            },
        ]),
        ..Container::default()
    };

    let mut statefulset = StatefulSet {
        metadata: apply::owned_metadata(ctx, ETCD_NAME, ETCD_NAME),
        spec: Some(StatefulSetSpec {
            replicas: Some(etcd.replicas),
            service_name: Some(ETCD_NAME.to_string()),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(selector_labels()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(apply::component_labels(ctx, ETCD_NAME)),
                    annotations: Some(BTreeMap::from([(
                        CERT_CHECKSUM_ANNOTATION.to_string(),
                        server_checksum.to_string(),
                    )])),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..PodSpec::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("data".to_string()),
                    ..ObjectMeta::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(etcd.storage_size.clone()),
                        )])),
                        ..VolumeResourceRequirements::default()
                    }),
                    ..PersistentVolumeClaimSpec::default()
                }),
                ..PersistentVolumeClaim::default()
            }]),
            ..StatefulSetSpec::default()
        }),
        ..StatefulSet::default()
    };

    let mut workload = Workload::StatefulSet(&mut statefulset);
    workload.add_volume(secret_volume("server-tls", ETCD_SERVER_CERT), true);
    workload.add_volume(
        Volume {
            name: "ca-bundle".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: ETCD_CA_BUNDLE.to_string(),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
        true,
    );
    workload.add_volume_mount(&[ETCD_NAME], &mount("server-tls", "/srv/etcd/server"), true);
    workload.add_volume_mount(&[ETCD_NAME], &mount("ca-bundle", "/srv/etcd/ca"), true);
    workload.add_volume_mount(
        &[ETCD_NAME],
        &VolumeMount {
            name: "data".to_string(),
            mount_path: "/var/lib/etcd".to_string(),
            ..VolumeMount::default()
        },
        true,
    );
    workload.visit_containers(&[ETCD_NAME], |c| {
        for (name, field) in [
            ("POD_NAME", "metadata.name"),
            ("POD_NAMESPACE", "metadata.namespace"),
        ] {
            pod::add_env_var(c, field_ref_env(name, field), false);
        }
    });
    statefulset
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

#[async_trait]
impl Deployer for EtcdDeployer {
    fn name(&self) -> &str {
        ETCD_NAME
    }

    async fn deploy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let credentials = &ctx.credentials;
        let cert_options = || {
            vec![
                persist(),
                rotate(RotationMode::InPlace),
                signed_by_ca(CA_ETCD),
            ]
        };
        let server = credentials
            .generate(server_certificate_config(&ctx.namespace), cert_options())
            .await?;
        credentials
            .generate(client_certificate_config(), cert_options())
            .await?;

        let bundle = credentials
            .trust_bundle(CA_ETCD)
            .ok_or_else(|| CredentialError::SignerNotFound(CA_ETCD.to_string()))?;
        apply::apply_ca_bundle(&self.client, ctx, ETCD_CA_BUNDLE, ETCD_NAME, bundle).await?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), &ctx.namespace);
        for service in desired_services(ctx) {
            apply::apply(&services, &service).await?;
        }
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::apply(&statefulsets, &desired_statefulset(ctx, &server.checksum)).await?;
        Ok(())
    }

    async fn wait(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::wait_statefulset(&self.client, &ctx.namespace, ETCD_NAME).await
    }

    async fn destroy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::delete(&statefulsets, ETCD_NAME).await?;
        let services: Api<Service> = Api::namespaced(self.client.clone(), &ctx.namespace);
        for service in desired_services(ctx) {
            if let Some(name) = service.metadata.name.as_deref() {
                apply::delete(&services, name).await?;
            }
        }
        Ok(())
    }

    async fn wait_cleanup(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &ctx.namespace);
        apply::wait_gone(&statefulsets, ETCD_NAME).await
    }
}
