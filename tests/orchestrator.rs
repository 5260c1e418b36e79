//! # Orchestrator Tests
//!
//! Drive full passes against in-process fakes: phase ordering, resumption
//! after a restart, reverse teardown behind the finalizer, status conflicts
//! and the rotation annotation.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{clear, counts, events, FlakyListStore, Harness};
use virtual_cluster_operator::constants::{FINALIZER, OPERATION_ANNOTATION};
use virtual_cluster_operator::controller::orchestrator::{Decision, PassError};
use virtual_cluster_operator::credentials::CredentialManager;
use virtual_cluster_operator::crd::{OperationState, OperationType, RotationPhase};
use virtual_cluster_operator::observability::metrics;

const IDENTITY: &str = "virtual-cluster-operator";

fn state(harness: &Harness) -> OperationState {
    harness
        .resources
        .current()
        .status
        .and_then(|s| s.last_operation)
        .map(|op| op.state)
        .expect("Should have a last operation")
}

async fn credentials(harness: &Harness) -> CredentialManager {
    CredentialManager::load(
        Arc::new(harness.store.clone()),
        "vc-tenant-a",
        IDENTITY,
        BTreeMap::new(),
    )
    .await
    .expect("Should load records from the in-memory store")
}

/// A healthy flow runs every phase in order and settles until the resync interval
#[tokio::test]
async fn test_phases_run_in_order() {
    let harness = Harness::new(common::cluster("tenant-a"));

    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::Requeue(d) if d == Duration::from_secs(300)));
    assert_eq!(
        harness.phase_events(),
        vec![
            "deploy:namespace",
            "wait:namespace",
            "deploy:etcd",
            "wait:etcd",
            "deploy:kube-apiserver",
            "wait:kube-apiserver",
            "deploy_bootstrap:access-broker",
            "deploy:access-broker",
            "wait:access-broker",
            "finish_bootstrap:access-broker",
        ]
    );
    let current = harness.resources.current();
    assert_eq!(
        current.metadata.finalizers,
        Some(vec![FINALIZER.to_string()])
    );
    let status = current.status.expect("Should have written a status");
    let last = status.last_operation.expect("Should have a last operation");
    assert_eq!(last.r#type, OperationType::Reconcile);
    assert_eq!(last.state, OperationState::Succeeded);
    assert_eq!(last.progress, 100);
    assert_eq!(status.observed_generation, Some(1));
    assert!(status
        .conditions
        .iter()
        .all(|c| c.status == "True"));
}

/// A phase that is not healthy stops the walk; later phases are not attempted
#[tokio::test]
async fn test_waiting_phase_halts_pass() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.flow.etcd.not_ready_waits.store(1, Ordering::SeqCst);

    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::Requeue(d) if d == Duration::from_secs(5)));
    assert!(!harness
        .phase_events()
        .iter()
        .any(|e| e.ends_with(":kube-apiserver")));
    let last = harness
        .resources
        .current()
        .status
        .and_then(|s| s.last_operation)
        .expect("Should have a last operation");
    assert_eq!(last.state, OperationState::Progressing);
    assert_eq!(last.progress, 40);
    assert!(last.description.contains("etcd"));
}

/// The first pass that cannot get past the first phase reports Pending
#[tokio::test]
async fn test_first_pass_without_progress_is_pending() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.flow.namespace.not_ready_waits.store(1, Ordering::SeqCst);

    harness.pass().await;

    assert_eq!(state(&harness), OperationState::Pending);
}

/// A restarted operator resumes from persisted records without reissuing them
#[tokio::test]
async fn test_resume_after_restart_reuses_credentials() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.flow.apiserver.not_ready_waits.store(1, Ordering::SeqCst);

    harness.pass().await;
    let writes_after_first_pass = harness.store.write_count();
    let records = harness.store.names("vc-tenant-a");
    assert_eq!(records.len(), 4, "one record per certificate authority");

    // Each pass builds a fresh orchestrator, as a restarted process would
    clear(&harness.log);
    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::Requeue(d) if d == Duration::from_secs(300)));
    assert_eq!(harness.store.write_count(), writes_after_first_pass);
    assert_eq!(harness.store.names("vc-tenant-a"), records);
    assert_eq!(state(&harness), OperationState::Succeeded);
}

/// Later passes skip the bootstrap run once the stable credential exists
#[tokio::test]
async fn test_bootstrap_runs_once() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.pass().await;
    harness.pass().await;

    let counts = counts(&events(&harness.log));
    assert_eq!(counts.get("deploy_bootstrap:access-broker"), Some(&1));
    assert_eq!(counts.get("deploy:access-broker"), Some(&2));
    assert_eq!(counts.get("finish_bootstrap:access-broker"), Some(&2));
}

/// Deletion tears down in reverse order and drops the finalizer last
#[tokio::test]
async fn test_teardown_reverse_order_finalizer_last() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.pass().await;
    assert!(!harness.store.names("vc-tenant-a").is_empty());

    harness.resources.mark_deleted();
    clear(&harness.log);
    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::AwaitChange));
    assert_eq!(
        events(&harness.log),
        vec![
            "destroy:access-broker",
            "wait_cleanup:access-broker",
            "destroy:kube-apiserver",
            "wait_cleanup:kube-apiserver",
            "destroy:etcd",
            "wait_cleanup:etcd",
            "destroy:namespace",
            "wait_cleanup:namespace",
            "finalizers:",
        ]
    );
    assert!(harness.store.names("vc-tenant-a").is_empty());
    assert!(!harness.resources.exists());
}

/// A component still terminating keeps the finalizer and records a Delete operation
#[tokio::test]
async fn test_teardown_waits_for_cleanup() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.pass().await;
    harness.flow.etcd.not_ready_cleanups.store(1, Ordering::SeqCst);

    harness.resources.mark_deleted();
    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::Requeue(_)));
    let current = harness.resources.current();
    assert_eq!(current.metadata.finalizers, Some(vec![FINALIZER.to_string()]));
    let last = current
        .status
        .and_then(|s| s.last_operation)
        .expect("Should have a last operation");
    assert_eq!(last.r#type, OperationType::Delete);
    assert!(!events(&harness.log).iter().any(|e| e == "destroy:namespace"));

    let decision = harness.pass().await;
    assert!(matches!(decision, Decision::AwaitChange));
    assert!(!harness.resources.exists());
}

/// Deleting a resource that never got our finalizer does nothing
#[tokio::test]
async fn test_delete_without_finalizer_is_noop() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.resources.mark_deleted();

    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::AwaitChange));
    assert!(events(&harness.log).is_empty());
}

/// Status conflicts are retried against the fresh object
#[tokio::test]
async fn test_status_conflict_is_retried() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.pass().await;
    let writes = harness.resources.status_writes.load(Ordering::SeqCst);

    harness.resources.inject_conflicts.store(2, Ordering::SeqCst);
    harness.pass().await;

    assert_eq!(
        harness.resources.status_writes.load(Ordering::SeqCst),
        writes + 1
    );
}

/// Status computed for an older generation is dropped instead of overwriting
#[tokio::test]
async fn test_stale_status_is_dropped() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.pass().await;
    let before = harness.resources.current().status;

    *harness.resources.bump_generation_on_conflict.lock().unwrap() = true;
    harness.resources.inject_conflicts.store(1, Ordering::SeqCst);
    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::Requeue(_)));
    assert_eq!(harness.resources.current().status, before);
    assert_eq!(harness.resources.current().metadata.generation, Some(2));
}

/// Persistent conflicts give up after the retry budget without failing the pass
#[tokio::test]
async fn test_status_conflicts_exhaust_retries() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.pass().await;
    let writes = harness.resources.status_writes.load(Ordering::SeqCst);

    harness.resources.inject_conflicts.store(100, Ordering::SeqCst);
    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::Requeue(_)));
    assert_eq!(harness.resources.status_writes.load(Ordering::SeqCst), writes);
}

/// An invalid spec is reported once and waits for the next change
#[tokio::test]
async fn test_invalid_config_awaits_change() {
    let mut cluster = common::cluster("tenant-a");
    cluster.spec.networking.services = "not-a-cidr".to_string();
    let harness = Harness::new(cluster);

    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::AwaitChange));
    assert!(harness.phase_events().is_empty());
    let last = harness
        .resources
        .current()
        .status
        .and_then(|s| s.last_operation)
        .expect("Should have a last operation");
    assert_eq!(last.state, OperationState::Error);
    assert!(last.description.contains("not-a-cidr"));
}

/// A failing component surfaces its error to the error policy
#[tokio::test]
async fn test_deploy_failure_is_retried() {
    let harness = Harness::new(common::cluster("tenant-a"));
    *harness.flow.apiserver.fail_deploy.lock().unwrap() = Some("quota exceeded".to_string());

    let decision = harness.pass().await;

    let Decision::Retry(error) = decision else {
        panic!("expected a retry, got {decision:?}");
    };
    assert!(matches!(error, PassError::DeployFailed { .. }));
    let last = harness
        .resources
        .current()
        .status
        .and_then(|s| s.last_operation)
        .expect("Should have a last operation");
    assert_eq!(last.state, OperationState::Error);
    assert!(last.description.contains("quota exceeded"));
}

/// Shutdown cancels the pass without writing status
#[tokio::test]
async fn test_shutdown_cancels_without_status() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.shutdown.cancel();

    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::Requeue(_)));
    assert!(harness.resources.current().status.is_none());
}

/// Two-step rotation: new CAs are trusted next to the old ones, then the old ones go
#[tokio::test]
async fn test_credential_rotation_annotation() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.pass().await;
    let original = credentials(&harness).await.get("ca").expect("Should have a CA");

    harness
        .resources
        .annotate(OPERATION_ANNOTATION, "rotate-credentials-start");
    clear(&harness.log);
    harness.pass().await;

    assert!(events(&harness.log).iter().any(|e| e == "annotation:removed"));
    let status = harness.resources.current().status.expect("Should have a status");
    let rotation = status
        .credentials
        .and_then(|c| c.certificate_authorities)
        .expect("Should track CA rotation");
    assert_eq!(rotation.phase, RotationPhase::Prepared);
    let manager = credentials(&harness).await;
    let rotated = manager.get("ca").expect("Should have a current CA");
    let old = manager.get_old("ca").expect("Should keep the old CA");
    assert_ne!(rotated.name, original.name);
    assert_eq!(old.name, original.name);

    // Starting again while a rotation is in flight is ignored
    harness
        .resources
        .annotate(OPERATION_ANNOTATION, "rotate-credentials-start");
    harness.pass().await;
    assert_eq!(
        credentials(&harness).await.get("ca").map(|r| r.name),
        Some(rotated.name.clone())
    );

    harness
        .resources
        .annotate(OPERATION_ANNOTATION, "rotate-credentials-complete");
    harness.pass().await;

    let status = harness.resources.current().status.expect("Should have a status");
    let rotation = status
        .credentials
        .and_then(|c| c.certificate_authorities)
        .expect("Should track CA rotation");
    assert_eq!(rotation.phase, RotationPhase::Completed);
    assert!(rotation.last_completion_time.is_some());
    let manager = credentials(&harness).await;
    assert_eq!(manager.get("ca").map(|r| r.name), Some(rotated.name));
    assert!(manager.get_old("ca").is_none());
}

/// Unknown operations are dropped without blocking the pass
#[tokio::test]
async fn test_unknown_operation_is_ignored() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.resources.annotate(OPERATION_ANNOTATION, "reboot");

    let decision = harness.pass().await;

    assert!(matches!(decision, Decision::Requeue(_)));
    assert!(events(&harness.log).iter().any(|e| e == "annotation:removed"));
    assert_eq!(state(&harness), OperationState::Succeeded);
}

/// A rotation whose status write is dropped keeps its annotation for the next pass
#[tokio::test]
async fn test_dropped_status_keeps_operation_annotation() {
    let harness = Harness::new(common::cluster("tenant-a"));
    harness.pass().await;

    harness
        .resources
        .annotate(OPERATION_ANNOTATION, "rotate-credentials-start");
    *harness.resources.bump_generation_on_conflict.lock().unwrap() = true;
    harness.resources.inject_conflicts.store(1, Ordering::SeqCst);
    clear(&harness.log);
    harness.pass().await;

    assert!(!events(&harness.log).iter().any(|e| e == "annotation:removed"));
    let current = harness.resources.current();
    assert_eq!(
        current
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(OPERATION_ANNOTATION))
            .map(String::as_str),
        Some("rotate-credentials-start")
    );
    assert!(current.status.and_then(|s| s.credentials).is_none());

    *harness.resources.bump_generation_on_conflict.lock().unwrap() = false;
    harness.pass().await;

    assert!(events(&harness.log).iter().any(|e| e == "annotation:removed"));
    let rotation = harness
        .resources
        .current()
        .status
        .and_then(|s| s.credentials)
        .and_then(|c| c.certificate_authorities)
        .expect("Should track CA rotation once the status lands");
    assert_eq!(rotation.phase, RotationPhase::Prepared);
}

/// A failed garbage collection is counted but does not fail the pass
#[tokio::test]
async fn test_gc_failure_is_counted() {
    let harness = Harness::new(common::cluster("tenant-a"));
    // Loading the records lists once; the cleanup at the end of the pass fails
    let store = FlakyListStore::new(harness.store.clone(), 1);
    let before = metrics::credential_gc_failures();

    let decision = harness
        .orchestrator_with_store(Arc::new(store))
        .reconcile(Arc::new(harness.resources.current()))
        .await;

    assert!(matches!(decision, Decision::Requeue(_)));
    assert_eq!(state(&harness), OperationState::Succeeded);
    assert!(metrics::credential_gc_failures() > before);
}
