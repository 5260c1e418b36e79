//! # Resource Client
//!
//! Narrow seam between the orchestrator and the `VirtualCluster` API so the pass
//! logic can be exercised against an in-process fake.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use thiserror::Error;
use tracing::debug;

use crate::constants::FIELD_MANAGER;
use crate::crd::VirtualCluster;

#[derive(Debug, Error)]
pub enum ResourceError {
    /// The write carried a stale `resourceVersion`
    #[error("conflict writing {0}: resource version is stale")]
    Conflict(String),

    #[error("virtual cluster {0} not found")]
    NotFound(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<VirtualCluster>, ResourceError>;

    /// Write `resource.status`, conditional on `resource.metadata.resourceVersion`
    async fn replace_status(&self, resource: &VirtualCluster) -> Result<(), ResourceError>;

    async fn set_finalizers(&self, name: &str, finalizers: Vec<String>)
        -> Result<(), ResourceError>;

    async fn remove_annotation(&self, name: &str, key: &str) -> Result<(), ResourceError>;
}

/// `ResourceClient` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceClient {
    api: Api<VirtualCluster>,
}

impl std::fmt::Debug for KubeResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient").finish_non_exhaustive()
    }
}

impl KubeResourceClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn classify(name: &str, error: kube::Error) -> ResourceError {
    match error {
        kube::Error::Api(api_err) if api_err.code == 409 => {
            ResourceError::Conflict(name.to_string())
        }
        kube::Error::Api(api_err) if api_err.code == 404 => {
            ResourceError::NotFound(name.to_string())
        }
        other => ResourceError::Kube(other),
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, name: &str) -> Result<Option<VirtualCluster>, ResourceError> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn replace_status(&self, resource: &VirtualCluster) -> Result<(), ResourceError> {
        let name = resource.metadata.name.as_deref().unwrap_or_default();
        // A resourceVersion inside a merge patch is a precondition checked by the API server
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": resource.metadata.resource_version },
            "status": resource.status,
        });
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(name, e))?;
        debug!(resource.name = name, "status.written");
        Ok(())
    }

    async fn set_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ResourceError> {
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(name, e))?;
        Ok(())
    }

    async fn remove_annotation(&self, name: &str, key: &str) -> Result<(), ResourceError> {
        let patch = serde_json::json!({
            "metadata": { "annotations": { key: serde_json::Value::Null } }
        });
        self.api
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| classify(name, e))?;
        debug!(resource.name = name, annotation = key, "annotation.removed");
        Ok(())
    }
}
