//! # Credential Lifecycle Manager
//!
//! Issues, rotates and garbage-collects the credential records of one namespace.
//!
//! A manager is loaded once per reconciliation pass. It indexes every record the
//! configured identity owns, serves `generate` requests from deployers and tracks
//! which records the pass touched so that [`CredentialManager::cleanup`] can delete
//! the rest.
//!
//! ## Naming
//!
//! - `Rotate(InPlace)`: the record name is the config name; a change overwrites
//!   the payload.
//! - `Rotate(KeepOld)` and no rotation mode: the record name is
//!   `<config>-<hash8>`; a change yields a new record.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::credentials::config::{content_addressed_name, CredentialConfig, KubeconfigAuth};
use crate::credentials::error::{CredentialError, StoreError};
use crate::credentials::kubeconfig;
use crate::credentials::options::{GenerateOption, GenerateOptions, RotationMode, SignerRef};
use crate::credentials::pki::{self, CertificateInfo, KeyMaterial};
use crate::credentials::record::{
    payload, CredentialKind, CredentialRecord, LabelSelector, Payload, RecordPhase, DATA_CA_CERT,
    DATA_CA_KEY, DATA_KEY, DATA_KUBECONFIG, DATA_STATIC_TOKENS, DATA_TLS_CERT, DATA_TLS_KEY,
    DATA_TOKEN,
};
use crate::credentials::store::CredentialStore;
use crate::credentials::token;
use crate::observability::metrics;

#[derive(Debug, Default)]
struct PassState {
    /// Every known record keyed by record name
    records: BTreeMap<String, CredentialRecord>,
    /// Record names generated, retained or looked up during this pass
    used: BTreeSet<String>,
    /// Config name -> record name returned by `generate` during this pass
    issued: BTreeMap<String, String>,
}

impl PassState {
    fn of_config(&self, config_name: &str) -> impl Iterator<Item = &CredentialRecord> + '_ {
        let config_name = config_name.to_string();
        self.records
            .values()
            .filter(move |r| r.config_name == config_name)
    }

    /// Live record of a config; a config has at most one outside a rotation in flight
    fn current(&self, config_name: &str) -> Option<&CredentialRecord> {
        self.of_config(config_name)
            .filter(|r| r.phase.is_live())
            .max_by(|a, b| (a.issued_at, &a.name).cmp(&(b.issued_at, &b.name)))
    }

    fn old(&self, config_name: &str) -> Option<&CredentialRecord> {
        self.of_config(config_name)
            .filter(|r| r.phase == RecordPhase::Old)
            .max_by_key(|r| r.issued_at)
    }

    fn lookup(&self, config_name: &str) -> Option<&CredentialRecord> {
        self.issued
            .get(config_name)
            .and_then(|name| self.records.get(name))
            .or_else(|| self.current(config_name))
    }
}

/// Credential manager of one namespace for one pass
#[derive(Debug)]
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    namespace: String,
    identity: String,
    /// Config name -> rotation epoch folded into the config checksum
    rotation_epochs: BTreeMap<String, String>,
    /// Serializes `generate` and the bulk operations; held across store calls
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<PassState>,
}

impl CredentialManager {
    /// Index every record of `identity` in `namespace`
    pub async fn load(
        store: Arc<dyn CredentialStore>,
        namespace: &str,
        identity: &str,
        rotation_epochs: BTreeMap<String, String>,
    ) -> Result<Self, CredentialError> {
        let records = store
            .list(namespace, &LabelSelector::managed_by(identity))
            .await?;
        debug!(
            namespace = namespace,
            identity = identity,
            records = records.len(),
            "credential.manager.loaded"
        );

        let state = PassState {
            records: records.into_iter().map(|r| (r.name.clone(), r)).collect(),
            ..PassState::default()
        };

        Ok(Self {
            store,
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            rotation_epochs,
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn state(&self) -> MutexGuard<'_, PassState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue or reuse the record for `config`
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` when the config is missing required fields or a signer
    ///   is given for a non-certificate config
    /// - `SignerNotFound` when the signer has no current record
    /// - `Store`/`Pki` when persisting or key generation fails
    pub async fn generate<C, I>(
        &self,
        config: C,
        options: I,
    ) -> Result<CredentialRecord, CredentialError>
    where
        C: Into<CredentialConfig>,
        I: IntoIterator<Item = GenerateOption>,
    {
        let config = config.into();
        let options = GenerateOptions::from_options(options);
        config.validate()?;

        let _guard = self.op_lock.lock().await;
        let config_name = config.name().to_string();
        let now = chrono::Utc::now().timestamp();

        let signer = self.resolve_signer(&config, options.signer.as_ref())?;
        let checksum = config.checksum(
            signer.as_ref().map(|s| s.checksum.as_str()),
            self.rotation_epochs.get(&config_name).map(String::as_str),
        )?;
        let record_name = if options.fixed_name() {
            config_name.clone()
        } else {
            content_addressed_name(&config_name, &checksum)
        };
        let phase = if options.bootstrap {
            RecordPhase::Bootstrap
        } else {
            RecordPhase::Current
        };

        let (existing, previous) = {
            let state = self.state();
            (
                state.records.get(&record_name).cloned(),
                state.current(&config_name).cloned(),
            )
        };

        let record = match existing {
            Some(existing) if reusable(&existing, &checksum, now) => {
                self.reuse(existing, phase, &options).await?
            }
            _ => {
                let data = build_payload(&config, signer.as_ref(), previous.as_ref())?;
                let record = CredentialRecord {
                    name: record_name.clone(),
                    namespace: self.namespace.clone(),
                    config_name: config_name.clone(),
                    kind: config.kind(),
                    checksum: checksum.clone(),
                    phase,
                    persist: options.persist,
                    identity: self.identity.clone(),
                    issued_at: now,
                    signed_by: signer.as_ref().map(|s| s.name.clone()),
                    signer_checksum: signer.as_ref().map(|s| s.checksum.clone()),
                    data,
                };
                self.replace(record, previous.as_ref(), &options).await?
            }
        };

        if options.rotation.is_none() {
            if let Some(previous) = previous.filter(|p| p.name != record.name) {
                self.supersede(previous).await?;
            }
        }

        if options.ignore_old_secrets {
            self.delete_old(&config_name).await?;
        }

        let mut state = self.state();
        state.used.insert(record.name.clone());
        let retained = state.old(&config_name).map(|r| r.name.clone());
        if let (Some(RotationMode::KeepOld), Some(old)) = (options.rotation, retained) {
            state.used.insert(old);
        }
        state.issued.insert(config_name, record.name.clone());
        Ok(record)
    }

    fn resolve_signer(
        &self,
        config: &CredentialConfig,
        signer: Option<&SignerRef>,
    ) -> Result<Option<CredentialRecord>, CredentialError> {
        let is_leaf = matches!(config, CredentialConfig::Certificate(_));
        let Some(signer) = signer else {
            if is_leaf {
                return Err(CredentialError::invalid(
                    config.name(),
                    "certificates must be signed by a certificate authority",
                ));
            }
            return Ok(None);
        };
        if !is_leaf {
            return Err(CredentialError::invalid(
                config.name(),
                "only certificates can be signed",
            ));
        }

        let mut state = self.state();
        let current = state
            .lookup(&signer.name)
            .filter(|r| r.kind == CredentialKind::CertificateAuthority)
            .cloned()
            .ok_or_else(|| CredentialError::SignerNotFound(signer.name.clone()))?;
        let chosen = if signer.use_old {
            state.old(&signer.name).cloned().unwrap_or(current)
        } else {
            current
        };
        state.used.insert(chosen.name.clone());
        Ok(Some(chosen))
    }

    /// Return an unchanged record, fixing up its labels if the options moved on
    async fn reuse(
        &self,
        mut existing: CredentialRecord,
        phase: RecordPhase,
        options: &GenerateOptions,
    ) -> Result<CredentialRecord, CredentialError> {
        let promote_to_store = options.persist && !existing.persist;
        let relabel = existing.phase != phase;
        if !promote_to_store && !relabel {
            return Ok(existing);
        }

        let was_persisted = existing.persist;
        existing.phase = phase;
        existing.persist = existing.persist || options.persist;
        if was_persisted {
            self.store.update(&existing).await?;
        } else if existing.persist {
            self.create(&existing).await?;
        }
        self.state()
            .records
            .insert(existing.name.clone(), existing.clone());
        Ok(existing)
    }

    /// Install a freshly generated record according to the rotation mode
    async fn replace(
        &self,
        record: CredentialRecord,
        previous: Option<&CredentialRecord>,
        options: &GenerateOptions,
    ) -> Result<CredentialRecord, CredentialError> {
        let fixed_exists = self.state().records.contains_key(&record.name);

        match options.rotation {
            Some(RotationMode::InPlace) if fixed_exists => {
                if record.persist {
                    match self.store.update(&record).await {
                        Err(StoreError::NotFound { .. }) => self.create(&record).await?,
                        other => other?,
                    }
                }
                metrics::increment_credentials_rotated(record.kind.as_str());
                info!(
                    record.name = record.name.as_str(),
                    namespace = self.namespace.as_str(),
                    "Rotated credential in place"
                );
            }
            Some(RotationMode::KeepOld) => {
                self.delete_old(&record.config_name).await?;
                if let Some(previous) = previous {
                    if previous.name != record.name {
                        let mut retired = previous.clone();
                        retired.phase = RecordPhase::Old;
                        if retired.persist {
                            self.store.update(&retired).await?;
                        }
                        self.state()
                            .records
                            .insert(retired.name.clone(), retired.clone());
                        metrics::increment_credentials_rotated(record.kind.as_str());
                        info!(
                            record.name = record.name.as_str(),
                            old = retired.name.as_str(),
                            namespace = self.namespace.as_str(),
                            "Rotated credential, previous record kept as old"
                        );
                    }
                }
                if record.persist {
                    self.create(&record).await?;
                }
            }
            _ => {
                if record.persist {
                    self.create(&record).await?;
                }
            }
        }

        metrics::increment_credentials_generated(record.kind.as_str());
        debug!(
            record.name = record.name.as_str(),
            namespace = self.namespace.as_str(),
            kind = record.kind.as_str(),
            "credential.generated"
        );
        self.state()
            .records
            .insert(record.name.clone(), record.clone());
        Ok(record)
    }

    /// Take a replaced content-addressed record out of service; GC deletes it once unused
    async fn supersede(&self, mut previous: CredentialRecord) -> Result<(), CredentialError> {
        previous.phase = RecordPhase::Superseded;
        if previous.persist {
            match self.store.update(&previous).await {
                Err(StoreError::NotFound { .. }) => {}
                other => other?,
            }
        }
        debug!(
            record.name = previous.name.as_str(),
            namespace = self.namespace.as_str(),
            "credential.superseded"
        );
        self.state().records.insert(previous.name.clone(), previous);
        Ok(())
    }

    async fn create(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        match self.store.create(record).await {
            Ok(()) | Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_record(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        if record.persist {
            self.store.delete(&record.namespace, &record.name).await?;
        }
        let mut state = self.state();
        state.records.remove(&record.name);
        state.used.remove(&record.name);
        metrics::increment_credentials_deleted(record.kind.as_str());
        Ok(())
    }

    async fn delete_old(&self, config_name: &str) -> Result<(), CredentialError> {
        let old: Vec<CredentialRecord> = self
            .state()
            .of_config(config_name)
            .filter(|r| r.phase == RecordPhase::Old)
            .cloned()
            .collect();
        for record in &old {
            info!(
                record.name = record.name.as_str(),
                namespace = self.namespace.as_str(),
                "Deleting old credential"
            );
            self.delete_record(record).await?;
        }
        Ok(())
    }

    /// Current record of a config, preferring the one issued this pass
    pub fn get(&self, config_name: &str) -> Option<CredentialRecord> {
        let mut state = self.state();
        let record = state.lookup(config_name).cloned()?;
        state.used.insert(record.name.clone());
        Some(record)
    }

    /// Retained old record of a config
    pub fn get_old(&self, config_name: &str) -> Option<CredentialRecord> {
        let mut state = self.state();
        let record = state.old(config_name).cloned()?;
        state.used.insert(record.name.clone());
        Some(record)
    }

    /// PEM bundle of the current and old certificates of a CA
    pub fn trust_bundle(&self, ca_name: &str) -> Option<String> {
        let current = self.get(ca_name)?;
        let mut bundle = current.data_str(DATA_CA_CERT)?.to_string();
        if let Some(pem) = self.get_old(ca_name).as_ref().and_then(|r| r.data_str(DATA_CA_CERT)) {
            if !bundle.ends_with('\n') {
                bundle.push('\n');
            }
            bundle.push_str(pem);
        }
        Some(bundle)
    }

    /// Delete every record of a config
    pub async fn discard(&self, config_name: &str) -> Result<(), CredentialError> {
        let _guard = self.op_lock.lock().await;
        let records: Vec<CredentialRecord> =
            self.state().of_config(config_name).cloned().collect();
        for record in &records {
            self.delete_record(record).await?;
        }
        self.state().issued.remove(config_name);
        if !records.is_empty() {
            info!(
                config = config_name,
                namespace = self.namespace.as_str(),
                deleted = records.len(),
                "Discarded credential records"
            );
        }
        Ok(())
    }

    /// Delete every stored record not used during this pass
    ///
    /// Returns the number of records deleted. Call only after a fully successful
    /// pass; a partial pass has not touched everything it still needs.
    pub async fn cleanup(&self) -> Result<usize, CredentialError> {
        let _guard = self.op_lock.lock().await;
        let stored = self
            .store
            .list(&self.namespace, &LabelSelector::managed_by(&self.identity))
            .await?;
        let used = self.state().used.clone();

        let mut deleted = 0;
        for record in stored.iter().filter(|r| !used.contains(&r.name)) {
            debug!(
                record.name = record.name.as_str(),
                namespace = self.namespace.as_str(),
                "credential.gc.delete"
            );
            self.delete_record(record).await?;
            deleted += 1;
        }
        self.state()
            .records
            .retain(|name, record| record.persist || used.contains(name));
        if deleted > 0 {
            info!(
                namespace = self.namespace.as_str(),
                deleted = deleted,
                "Garbage collected unused credential records"
            );
        }
        Ok(deleted)
    }

    /// Delete every record of this identity in the namespace
    pub async fn delete_all(&self) -> Result<usize, CredentialError> {
        let _guard = self.op_lock.lock().await;
        let stored = self
            .store
            .list(&self.namespace, &LabelSelector::managed_by(&self.identity))
            .await?;
        for record in &stored {
            if let Err(e) = self.store.delete(&record.namespace, &record.name).await {
                warn!(
                    record.name = record.name.as_str(),
                    error = %e,
                    "Failed to delete credential record"
                );
                return Err(e.into());
            }
            metrics::increment_credentials_deleted(record.kind.as_str());
        }
        let mut state = self.state();
        state.records.clear();
        state.used.clear();
        state.issued.clear();
        Ok(stored.len())
    }
}

/// A stored record can be returned as-is when its content is still wanted
fn reusable(existing: &CredentialRecord, checksum: &str, now: i64) -> bool {
    if existing.checksum != checksum || existing.phase == RecordPhase::Old {
        return false;
    }
    // Content-addressed certificates change name on renewal, so only fixed
    // names are renewed here
    if existing.is_content_addressed() {
        return true;
    }
    let cert_key = match existing.kind {
        CredentialKind::CertificateAuthority => DATA_CA_CERT,
        CredentialKind::Certificate => DATA_TLS_CERT,
        _ => return true,
    };
    match existing.data_str(cert_key).map(CertificateInfo::from_pem) {
        Some(Ok(info)) => !info.needs_renewal(now),
        _ => false,
    }
}

fn build_payload(
    config: &CredentialConfig,
    signer: Option<&CredentialRecord>,
    previous: Option<&CredentialRecord>,
) -> Result<Payload, CredentialError> {
    let data = match config {
        CredentialConfig::CertificateAuthority(ca) => {
            let material = pki::generate_ca(ca)?;
            payload([
                (DATA_CA_CERT, material.cert_pem.into_bytes()),
                (DATA_CA_KEY, material.key_pem.into_bytes()),
            ])
        }
        CredentialConfig::Certificate(cert) => {
            let signer = signer.ok_or_else(|| CredentialError::SignerNotFound(cert.name.clone()))?;
            let signer_material = signer_material(signer)?;
            let material = pki::issue_certificate(cert, &signer_material)?;
            payload([
                (DATA_TLS_CERT, material.cert_pem.into_bytes()),
                (DATA_TLS_KEY, material.key_pem.into_bytes()),
                (DATA_CA_CERT, signer_material.cert_pem.into_bytes()),
            ])
        }
        CredentialConfig::SymmetricKey(key) => {
            payload([(DATA_KEY, token::generate_symmetric_key(key))])
        }
        CredentialConfig::StaticTokenBundle(bundle) => {
            let existing = previous
                .and_then(|r| r.data_str(DATA_STATIC_TOKENS))
                .map(token::parse_csv)
                .unwrap_or_default();
            let tokens = token::generate_static_tokens(bundle, &existing);
            payload([(DATA_STATIC_TOKENS, token::to_csv(&tokens).into_bytes())])
        }
        CredentialConfig::Kubeconfig(kc) => {
            let rendered =
                kubeconfig::render(kc).map_err(|source| CredentialError::Kubeconfig {
                    name: kc.name.clone(),
                    source,
                })?;
            let mut entries = vec![(DATA_KUBECONFIG, rendered.into_bytes())];
            if let KubeconfigAuth::Token { token } = &kc.auth {
                entries.push((DATA_TOKEN, token.clone().into_bytes()));
            }
            payload(entries)
        }
    };
    Ok(data)
}

fn signer_material(signer: &CredentialRecord) -> Result<KeyMaterial, CredentialError> {
    match (signer.data_str(DATA_CA_CERT), signer.data_str(DATA_CA_KEY)) {
        (Some(cert), Some(key)) => Ok(KeyMaterial {
            cert_pem: cert.to_string(),
            key_pem: key.to_string(),
        }),
        _ => Err(CredentialError::invalid(
            &signer.config_name,
            format!("signer record '{}' has no CA key pair", signer.name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::config::{CaConfig, CertificateConfig, StaticTokenConfig, TokenSpec};
    use crate::credentials::options::{persist, rotate, signed_by_ca};
    use crate::credentials::store::InMemoryStore;

    async fn manager(store: &InMemoryStore) -> CredentialManager {
        CredentialManager::load(
            Arc::new(store.clone()),
            "vc-a",
            "virtual-cluster-operator",
            BTreeMap::new(),
        )
        .await
        .expect("in-memory load cannot fail")
    }

    #[tokio::test]
    async fn test_non_persisted_records_stay_in_memory() {
        let store = InMemoryStore::new();
        let manager = manager(&store).await;
        let record = manager
            .generate(CaConfig::new("ca", "kubernetes"), [])
            .await
            .unwrap();
        assert_eq!(store.write_count(), 0);
        assert_eq!(manager.get("ca").map(|r| r.name), Some(record.name.clone()));
        assert!(record.name.starts_with("ca-"));
    }

    #[tokio::test]
    async fn test_leaf_requires_signer_option() {
        let store = InMemoryStore::new();
        let manager = manager(&store).await;
        let leaf = CertificateConfig::client("admin", "admin");
        let err = manager.generate(leaf, [persist()]).await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_leaf_embeds_signer_certificate() {
        let store = InMemoryStore::new();
        let manager = manager(&store).await;
        let ca = manager
            .generate(CaConfig::new("ca", "kubernetes"), [persist()])
            .await
            .unwrap();
        let leaf = manager
            .generate(
                CertificateConfig::client("admin", "admin"),
                [persist(), signed_by_ca("ca")],
            )
            .await
            .unwrap();
        assert_eq!(leaf.data.get(DATA_CA_CERT), ca.data.get(DATA_CA_CERT));
        let info = CertificateInfo::from_pem(leaf.data_str(DATA_TLS_CERT).unwrap()).unwrap();
        assert_eq!(info.issuer_common_name, "kubernetes");
    }

    #[tokio::test]
    async fn test_static_tokens_survive_regeneration() {
        let store = InMemoryStore::new();
        let manager = manager(&store).await;
        let spec = |groups: Vec<String>| StaticTokenConfig {
            name: "static-token".to_string(),
            tokens: BTreeMap::from([(
                "admin".to_string(),
                TokenSpec {
                    username: "admin".to_string(),
                    user_id: None,
                    groups,
                },
            )]),
        };
        let first = manager
            .generate(spec(vec![]), [persist(), rotate(RotationMode::InPlace)])
            .await
            .unwrap();
        let second = manager
            .generate(
                spec(vec!["system:masters".to_string()]),
                [persist(), rotate(RotationMode::InPlace)],
            )
            .await
            .unwrap();
        let token_of = |r: &CredentialRecord| {
            token::parse_csv(r.data_str(DATA_STATIC_TOKENS).unwrap())
                .get("admin")
                .cloned()
        };
        assert_ne!(first.checksum, second.checksum);
        assert_eq!(token_of(&first), token_of(&second));
        assert!(second
            .data_str(DATA_STATIC_TOKENS)
            .unwrap()
            .contains("system:masters"));
    }

    #[tokio::test]
    async fn test_trust_bundle_contains_old_ca_during_rotation() {
        let store = InMemoryStore::new();
        let first = manager(&store).await;
        first
            .generate(
                CaConfig::new("ca", "kubernetes"),
                [persist(), rotate(RotationMode::KeepOld)],
            )
            .await
            .unwrap();

        let epochs = BTreeMap::from([("ca".to_string(), "2026-10-17T00:00:00Z".to_string())]);
        let second = CredentialManager::load(
            Arc::new(store.clone()),
            "vc-a",
            "virtual-cluster-operator",
            epochs,
        )
        .await
        .unwrap();
        second
            .generate(
                CaConfig::new("ca", "kubernetes"),
                [persist(), rotate(RotationMode::KeepOld)],
            )
            .await
            .unwrap();

        let bundle = second.trust_bundle("ca").unwrap();
        assert_eq!(bundle.matches("BEGIN CERTIFICATE").count(), 2);
    }
}
