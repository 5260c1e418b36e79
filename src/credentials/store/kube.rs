//! Credential store backed by Kubernetes `Secret` objects.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, warn};

use super::CredentialStore;
use crate::constants::FIELD_MANAGER;
use crate::credentials::error::StoreError;
use crate::credentials::record::{payload, CredentialRecord, LabelSelector};

#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Secret representation of a record
///
/// Content-addressed records are immutable: a change always yields a new name.
#[must_use]
pub fn to_secret(record: &CredentialRecord) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(record.name.clone()),
            namespace: Some(record.namespace.clone()),
            labels: Some(record.labels()),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        immutable: record.is_content_addressed().then_some(true),
        data: Some(
            record
                .data
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

/// Record stored in a Secret, or `None` for Secrets the manager did not write
#[must_use]
pub fn from_secret(secret: Secret) -> Option<CredentialRecord> {
    let name = secret.metadata.name?;
    let namespace = secret.metadata.namespace.unwrap_or_default();
    let labels = secret.metadata.labels.unwrap_or_default();
    let data = payload(
        secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0)),
    );
    CredentialRecord::from_parts(&name, &namespace, &labels, data)
}

#[async_trait]
impl CredentialStore for KubeSecretStore {
    async fn create(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        match self
            .api(&record.namespace)
            .create(&PostParams::default(), &to_secret(record))
            .await
        {
            Ok(_) => {
                debug!(
                    record.name = record.name.as_str(),
                    record.namespace = record.namespace.as_str(),
                    "credential.store.created"
                );
                Ok(())
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                Err(StoreError::AlreadyExists {
                    namespace: record.namespace.clone(),
                    name: record.name.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let Some(secret) = self.api(namespace).get_opt(name).await? else {
            return Ok(None);
        };
        match from_secret(secret) {
            Some(record) => Ok(Some(record)),
            None => Err(StoreError::Malformed {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: "secret is not labelled as a credential record".to_string(),
            }),
        }
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let params = ListParams::default().labels(&selector.to_string());
        let secrets = self.api(namespace).list(&params).await?;
        let mut records = Vec::with_capacity(secrets.items.len());
        for secret in secrets.items {
            let name = secret.metadata.name.clone().unwrap_or_default();
            match from_secret(secret) {
                Some(record) => records.push(record),
                None => warn!(
                    secret.name = name.as_str(),
                    secret.namespace = namespace,
                    "Skipping secret with incomplete credential labels"
                ),
            }
        }
        Ok(records)
    }

    async fn update(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        // Server-side apply drops labels this field manager no longer sets
        let params = PatchParams::apply(FIELD_MANAGER).force();
        match self
            .api(&record.namespace)
            .patch(&record.name, &params, &Patch::Apply(&to_secret(record)))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(StoreError::NotFound {
                namespace: record.namespace.clone(),
                name: record.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
