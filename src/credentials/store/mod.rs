//! # Credential Store Adapter
//!
//! Persistence seam of the credential manager. Records are namespaced; the
//! manager only ever lists by label selector.

mod kube;
mod memory;

use async_trait::async_trait;

use crate::credentials::error::StoreError;
use crate::credentials::record::{CredentialRecord, LabelSelector};

pub use self::kube::KubeSecretStore;
pub use memory::InMemoryStore;

#[async_trait]
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Create a record; fails with `AlreadyExists` if the name is taken
    async fn create(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    async fn get(&self, namespace: &str, name: &str)
        -> Result<Option<CredentialRecord>, StoreError>;

    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<CredentialRecord>, StoreError>;

    /// Replace payload and labels of an existing record
    async fn update(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Delete a record; deleting a missing record succeeds
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}
