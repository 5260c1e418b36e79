//! # Test Fakes
//!
//! In-process stand-ins for the Kubernetes API and the control plane
//! components. Every fake appends to a shared event log so tests can assert
//! on ordering.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use virtual_cluster_operator::components::{
    BootstrapDeployer, CertificateAuthorities, DeployContext, DeployError, Deployer,
};
use virtual_cluster_operator::config::ControllerConfig;
use virtual_cluster_operator::constants::{FINALIZER, OPERATION_ANNOTATION};
use virtual_cluster_operator::controller::orchestrator::{FlowBuilder, Orchestrator, Phase};
use virtual_cluster_operator::controller::resource::{ResourceClient, ResourceError};
use virtual_cluster_operator::credentials::{
    CredentialRecord, CredentialStore, InMemoryStore, LabelSelector, StoreError,
};
use virtual_cluster_operator::crd::{
    DnsConfig, KubernetesConfig, NetworkingConfig, VirtualCluster, VirtualClusterSpec,
};

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn record(log: &EventLog, event: impl Into<String>) {
    log.lock().unwrap().push(event.into());
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn clear(log: &EventLog) {
    log.lock().unwrap().clear();
}

pub fn cluster(name: &str) -> VirtualCluster {
    let mut cluster = VirtualCluster::new(
        name,
        VirtualClusterSpec {
            namespace: None,
            zones: vec!["eu-west-1a".to_string()],
            kubernetes: KubernetesConfig {
                version: "1.30.4".to_string(),
            },
            networking: NetworkingConfig {
                services: "100.64.0.0/13".to_string(),
                pods: None,
            },
            dns: DnsConfig {
                domains: vec![format!("api.{name}.example.com")],
            },
            etcd: Default::default(),
            features: Default::default(),
            sync_interval: "5m".to_string(),
        },
    );
    cluster.metadata.generation = Some(1);
    cluster.metadata.resource_version = Some("1".to_string());
    cluster
}

/// `ResourceClient` over a single stored object with resourceVersion checks
#[derive(Debug, Clone)]
pub struct FakeResourceClient {
    object: Arc<Mutex<Option<VirtualCluster>>>,
    log: EventLog,
    /// Conflicts returned before the next status write goes through
    pub inject_conflicts: Arc<AtomicU32>,
    /// Simulate a spec change racing every conflicting status write
    pub bump_generation_on_conflict: Arc<Mutex<bool>>,
    pub status_writes: Arc<AtomicU32>,
}

impl FakeResourceClient {
    pub fn new(object: VirtualCluster, log: EventLog) -> Self {
        Self {
            object: Arc::new(Mutex::new(Some(object))),
            log,
            inject_conflicts: Arc::new(AtomicU32::new(0)),
            bump_generation_on_conflict: Arc::new(Mutex::new(false)),
            status_writes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Latest stored object, as the next watch event would deliver it
    pub fn current(&self) -> VirtualCluster {
        self.object.lock().unwrap().clone().expect("object exists")
    }

    pub fn exists(&self) -> bool {
        self.object.lock().unwrap().is_some()
    }

    pub fn update(&self, mutate: impl FnOnce(&mut VirtualCluster)) {
        let mut guard = self.object.lock().unwrap();
        let object = guard.as_mut().expect("object exists");
        mutate(object);
        bump(object);
    }

    pub fn annotate(&self, key: &str, value: &str) {
        self.update(|o| {
            o.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        });
    }

    pub fn mark_deleted(&self) {
        self.update(|o| {
            o.metadata.deletion_timestamp = Some(
                k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
            );
        });
    }
}

fn bump(object: &mut VirtualCluster) {
    let version: u64 = object
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    object.metadata.resource_version = Some((version + 1).to_string());
}

#[async_trait]
impl ResourceClient for FakeResourceClient {
    async fn get(&self, _name: &str) -> Result<Option<VirtualCluster>, ResourceError> {
        Ok(self.object.lock().unwrap().clone())
    }

    async fn replace_status(&self, resource: &VirtualCluster) -> Result<(), ResourceError> {
        let name = resource.metadata.name.clone().unwrap_or_default();
        let mut guard = self.object.lock().unwrap();
        let Some(object) = guard.as_mut() else {
            return Err(ResourceError::NotFound(name));
        };
        let injected = self
            .inject_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || object.metadata.resource_version != resource.metadata.resource_version {
            if *self.bump_generation_on_conflict.lock().unwrap() {
                object.metadata.generation = object.metadata.generation.map(|g| g + 1);
                bump(object);
            }
            return Err(ResourceError::Conflict(name));
        }
        object.status = resource.status.clone();
        bump(object);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        let state = resource
            .status
            .as_ref()
            .and_then(|s| s.last_operation.as_ref())
            .map(|op| op.state.as_str())
            .unwrap_or("none");
        record(&self.log, format!("status:{state}"));
        Ok(())
    }

    async fn set_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ResourceError> {
        let mut guard = self.object.lock().unwrap();
        let Some(object) = guard.as_mut() else {
            return Err(ResourceError::NotFound(name.to_string()));
        };
        record(&self.log, format!("finalizers:{}", finalizers.join(",")));
        let releasing = object.metadata.deletion_timestamp.is_some()
            && !finalizers.iter().any(|f| f == FINALIZER);
        object.metadata.finalizers = Some(finalizers);
        bump(object);
        if releasing {
            *guard = None;
        }
        Ok(())
    }

    async fn remove_annotation(&self, name: &str, key: &str) -> Result<(), ResourceError> {
        let mut guard = self.object.lock().unwrap();
        let Some(object) = guard.as_mut() else {
            return Err(ResourceError::NotFound(name.to_string()));
        };
        if let Some(annotations) = object.metadata.annotations.as_mut() {
            annotations.remove(key);
        }
        bump(object);
        if key == OPERATION_ANNOTATION {
            record(&self.log, "annotation:removed");
        }
        Ok(())
    }
}

/// Deployer whose health is scripted per test
#[derive(Debug)]
pub struct ScriptedDeployer {
    name: String,
    log: EventLog,
    /// `wait` calls answered with `NotReady` before it reports healthy
    pub not_ready_waits: AtomicU32,
    pub not_ready_cleanups: AtomicU32,
    pub fail_deploy: Mutex<Option<String>>,
}

impl ScriptedDeployer {
    pub fn new(name: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            not_ready_waits: AtomicU32::new(0),
            not_ready_cleanups: AtomicU32::new(0),
            fail_deploy: Mutex::new(None),
        })
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Deployer for ScriptedDeployer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deploy(&self, _ctx: &DeployContext) -> Result<(), DeployError> {
        record(&self.log, format!("deploy:{}", self.name));
        match self.fail_deploy.lock().unwrap().clone() {
            Some(reason) => Err(DeployError::Failed(anyhow::anyhow!(reason))),
            None => Ok(()),
        }
    }

    async fn wait(&self, _ctx: &DeployContext) -> Result<(), DeployError> {
        record(&self.log, format!("wait:{}", self.name));
        if take_one(&self.not_ready_waits) {
            return Err(DeployError::NotReady(format!("{} not ready", self.name)));
        }
        Ok(())
    }

    async fn destroy(&self, _ctx: &DeployContext) -> Result<(), DeployError> {
        record(&self.log, format!("destroy:{}", self.name));
        Ok(())
    }

    async fn wait_cleanup(&self, _ctx: &DeployContext) -> Result<(), DeployError> {
        record(&self.log, format!("wait_cleanup:{}", self.name));
        if take_one(&self.not_ready_cleanups) {
            return Err(DeployError::NotReady(format!("{} still terminating", self.name)));
        }
        Ok(())
    }
}

/// Bootstrap deployer whose stable credential appears after its bootstrap run
#[derive(Debug)]
pub struct ScriptedBootstrapDeployer {
    inner: Arc<ScriptedDeployer>,
    log: EventLog,
    stable_credential: Mutex<bool>,
}

impl ScriptedBootstrapDeployer {
    pub fn new(name: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            inner: ScriptedDeployer::new(name, log),
            log: Arc::clone(log),
            stable_credential: Mutex::new(false),
        })
    }
}

#[async_trait]
impl Deployer for ScriptedBootstrapDeployer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn deploy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        self.inner.deploy(ctx).await
    }

    async fn wait(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        self.inner.wait(ctx).await
    }

    async fn destroy(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        *self.stable_credential.lock().unwrap() = false;
        self.inner.destroy(ctx).await
    }

    async fn wait_cleanup(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        self.inner.wait_cleanup(ctx).await
    }
}

#[async_trait]
impl BootstrapDeployer for ScriptedBootstrapDeployer {
    async fn deploy_bootstrap(&self, _ctx: &DeployContext) -> Result<(), DeployError> {
        record(&self.log, format!("deploy_bootstrap:{}", self.name()));
        *self.stable_credential.lock().unwrap() = true;
        Ok(())
    }

    async fn wait_bootstrap(&self, _ctx: &DeployContext) -> Result<(), DeployError> {
        if *self.stable_credential.lock().unwrap() {
            Ok(())
        } else {
            Err(DeployError::NotReady("token not renewed yet".to_string()))
        }
    }

    async fn finish_bootstrap(&self, _ctx: &DeployContext) -> Result<(), DeployError> {
        record(&self.log, format!("finish_bootstrap:{}", self.name()));
        Ok(())
    }
}

/// namespace → certificate-authorities → etcd → kube-apiserver → access-broker
#[derive(Debug, Clone)]
pub struct TestFlow {
    pub namespace: Arc<ScriptedDeployer>,
    pub etcd: Arc<ScriptedDeployer>,
    pub apiserver: Arc<ScriptedDeployer>,
    pub access_broker: Arc<ScriptedBootstrapDeployer>,
}

impl TestFlow {
    pub fn new(log: &EventLog) -> Self {
        Self {
            namespace: ScriptedDeployer::new("namespace", log),
            etcd: ScriptedDeployer::new("etcd", log),
            apiserver: ScriptedDeployer::new("kube-apiserver", log),
            access_broker: ScriptedBootstrapDeployer::new("access-broker", log),
        }
    }
}

impl FlowBuilder for TestFlow {
    fn build(&self, _cluster: &VirtualCluster) -> Vec<Phase> {
        vec![
            Phase::Deploy(self.namespace.clone()),
            Phase::Credentials(Arc::new(CertificateAuthorities)),
            Phase::Deploy(self.etcd.clone()),
            Phase::Deploy(self.apiserver.clone()),
            Phase::BootstrapThenSwap(self.access_broker.clone()),
        ]
    }
}

/// `InMemoryStore` whose `list` starts failing once its budget is spent
#[derive(Debug, Clone)]
pub struct FlakyListStore {
    pub inner: InMemoryStore,
    /// Successful `list` calls left before every further call fails
    pub lists_left: Arc<AtomicU32>,
}

impl FlakyListStore {
    pub fn new(inner: InMemoryStore, lists_left: u32) -> Self {
        Self {
            inner,
            lists_left: Arc::new(AtomicU32::new(lists_left)),
        }
    }
}

#[async_trait]
impl CredentialStore for FlakyListStore {
    async fn create(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.inner.create(record).await
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.inner.get(namespace, name).await
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let allowed = self
            .lists_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StoreError::Malformed {
                namespace: namespace.to_string(),
                name: "*".to_string(),
                reason: "list unavailable".to_string(),
            });
        }
        self.inner.list(namespace, selector).await
    }

    async fn update(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.inner.update(record).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.inner.delete(namespace, name).await
    }
}

/// Everything one orchestrator test works with
pub struct Harness {
    pub log: EventLog,
    pub resources: FakeResourceClient,
    pub store: InMemoryStore,
    pub flow: TestFlow,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(object: VirtualCluster) -> Self {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            resources: FakeResourceClient::new(object, Arc::clone(&log)),
            store: InMemoryStore::new(),
            flow: TestFlow::new(&log),
            shutdown: CancellationToken::new(),
            log,
        }
    }

    /// A fresh orchestrator over the same fakes, as after a process restart
    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with_store(Arc::new(self.store.clone()))
    }

    pub fn orchestrator_with_store(&self, store: Arc<dyn CredentialStore>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(self.resources.clone()),
            store,
            Arc::new(self.flow.clone()),
            ControllerConfig::default(),
            self.shutdown.clone(),
        )
    }

    /// Run one pass against the latest stored object
    pub async fn pass(&self) -> virtual_cluster_operator::controller::orchestrator::Decision {
        self.orchestrator()
            .reconcile(Arc::new(self.resources.current()))
            .await
    }

    pub fn phase_events(&self) -> Vec<String> {
        events(&self.log)
            .into_iter()
            .filter(|e| !e.starts_with("status:") && !e.starts_with("finalizers:"))
            .collect()
    }
}

pub fn counts(events: &[String]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for event in events {
        *counts.entry(event.clone()).or_insert(0) += 1;
    }
    counts
}
