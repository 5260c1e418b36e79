//! # Object Apply Helpers
//!
//! Server-side apply and probe helpers shared by the component deployers.

use std::collections::BTreeMap;
use std::fmt::Debug;

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::components::{health, DeployContext, DeployError};
use crate::constants::FIELD_MANAGER;

/// Label carried by every object the operator renders
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

#[must_use]
pub fn component_labels(ctx: &DeployContext, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_COMPONENT.to_string(), component.to_string()),
        (LABEL_PART_OF.to_string(), ctx.cluster_name().to_string()),
        (LABEL_MANAGED_BY.to_string(), FIELD_MANAGER.to_string()),
    ])
}

/// Metadata of a namespaced object owned by the virtual cluster
#[must_use]
pub fn owned_metadata(ctx: &DeployContext, name: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(ctx.namespace.clone()),
        labels: Some(component_labels(ctx, component)),
        owner_references: ctx.cluster.controller_owner_ref(&()).map(|r| vec![r]),
        ..ObjectMeta::default()
    }
}

/// Server-side apply `object` with the operator's field manager
pub async fn apply<K>(api: &Api<K>, object: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = object
        .meta()
        .name
        .clone()
        .context("object to apply has no name")?;
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(object),
    )
    .await
    .with_context(|| format!("Failed to apply {} {name}", K::kind(&())))?;
    debug!(kind = %K::kind(&()), name = name.as_str(), "object.applied");
    Ok(())
}

/// Delete an object; a missing object counts as deleted
pub async fn delete<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {} {name}", K::kind(&()))),
    }
}

/// `NotReady` until the object is gone
pub async fn wait_gone<K>(api: &Api<K>, name: &str) -> Result<(), DeployError>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    let existing = api
        .get_opt(name)
        .await
        .with_context(|| format!("Failed to read {} {name}", K::kind(&())))?;
    match existing {
        Some(_) => Err(DeployError::NotReady(format!(
            "{} {name} is still being deleted",
            K::kind(&())
        ))),
        None => Ok(()),
    }
}

pub async fn wait_deployment(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<(), DeployError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = api
        .get_opt(name)
        .await
        .with_context(|| format!("Failed to read deployment {name}"))?
        .ok_or_else(|| DeployError::NotReady(format!("deployment {name} not found")))?;
    health::deployment_health(&deployment).map_err(DeployError::NotReady)
}

pub async fn wait_statefulset(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<(), DeployError> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let statefulset = api
        .get_opt(name)
        .await
        .with_context(|| format!("Failed to read statefulset {name}"))?
        .ok_or_else(|| DeployError::NotReady(format!("statefulset {name} not found")))?;
    health::statefulset_health(&statefulset).map_err(DeployError::NotReady)
}

/// Publish a CA bundle as a ConfigMap so workloads can mount it by a stable name
pub async fn apply_ca_bundle(
    client: &Client,
    ctx: &DeployContext,
    name: &str,
    component: &str,
    bundle: String,
) -> Result<()> {
    let config_map = ConfigMap {
        metadata: owned_metadata(ctx, name, component),
        data: Some(BTreeMap::from([("bundle.crt".to_string(), bundle)])),
        ..ConfigMap::default()
    };
    apply(&Api::namespaced(client.clone(), &ctx.namespace), &config_map).await
}

/// Image reference of a control plane component
#[must_use]
pub fn image(registry: &str, component: &str, version: &str) -> String {
    let version = version.trim_start_matches('v');
    format!("{}/{component}:v{version}", registry.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference() {
        assert_eq!(
            image("registry.k8s.io/", "kube-apiserver", "v1.30.4"),
            "registry.k8s.io/kube-apiserver:v1.30.4"
        );
        assert_eq!(
            image("mirror.example.com", "kube-controller-manager", "1.30.4"),
            "mirror.example.com/kube-controller-manager:v1.30.4"
        );
    }
}
