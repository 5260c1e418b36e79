//! In-memory credential store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::CredentialStore;
use crate::credentials::error::StoreError;
use crate::credentials::record::{CredentialRecord, LabelSelector};

type Key = (String, String);

/// Clones share the same records, so a "restarted" manager can reload them
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<BTreeMap<Key, CredentialRecord>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create, update and delete calls that changed the store
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Names of all records in a namespace, sorted
    #[must_use]
    pub fn names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, CredentialRecord>> {
        // A poisoned lock only means a test panicked mid-write; the map is still usable
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn key(namespace: &str, name: &str) -> Key {
        (namespace.to_string(), name.to_string())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn create(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let mut records = self.lock();
        let key = Self::key(&record.namespace, &record.name);
        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                namespace: record.namespace.clone(),
                name: record.name.clone(),
            });
        }
        records.insert(key, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.lock().get(&Self::key(namespace, name)).cloned())
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|((ns, _), record)| ns == namespace && selector.matches(&record.labels()))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn update(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let mut records = self.lock();
        let key = Self::key(&record.namespace, &record.name);
        match records.get_mut(&key) {
            Some(existing) => {
                *existing = record.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                namespace: record.namespace.clone(),
                name: record.name.clone(),
            }),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        if self.lock().remove(&Self::key(namespace, name)).is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
