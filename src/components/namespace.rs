//! # Namespace Phase
//!
//! Hosts every component and credential record of a virtual cluster.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ObjectMeta};
use kube::{Client, Resource};
use tracing::info;

use crate::components::{apply, health, DeployContext, DeployError, Deployer};
use crate::constants::API_GROUP;

/// Annotation listing the zones the control plane spreads over
pub const ZONES_ANNOTATION: &str = "operator.octopilot.io/zones";

pub struct NamespaceDeployer {
    client: Client,
}

impl NamespaceDeployer {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

/// Desired namespace object
#[must_use]
pub fn desired(ctx: &DeployContext) -> Namespace {
    let mut annotations = BTreeMap::new();
    if !ctx.cluster.spec.zones.is_empty() {
        annotations.insert(ZONES_ANNOTATION.to_string(), ctx.cluster.spec.zones.join(","));
    }
    let mut labels = apply::component_labels(ctx, "namespace");
    labels.insert(format!("{API_GROUP}/virtual-cluster"), ctx.cluster_name().to_string());

    Namespace {
        metadata: ObjectMeta {
            name: Some(ctx.namespace.clone()),
            labels: Some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: ctx.cluster.controller_owner_ref(&()).map(|r| vec![r]),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

#[async_trait]
impl Deployer for NamespaceDeployer {
    fn name(&self) -> &str {
        "namespace"
    }

    async fn deploy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::apply(&self.api(), &desired(ctx)).await?;
        Ok(())
    }

    async fn wait(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        let namespace = self
            .api()
            .get_opt(&ctx.namespace)
            .await
            .with_context(|| format!("Failed to read namespace {}", ctx.namespace))?
            .ok_or_else(|| {
                DeployError::NotReady(format!("namespace {} not found", ctx.namespace))
            })?;
        health::namespace_health(&namespace).map_err(DeployError::NotReady)
    }

    async fn destroy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::delete(&self.api(), &ctx.namespace).await?;
        info!(namespace = ctx.namespace.as_str(), "Deleting virtual cluster namespace");
        Ok(())
    }

    async fn wait_cleanup(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        apply::wait_gone(&self.api(), &ctx.namespace).await
    }
}
