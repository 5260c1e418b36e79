//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `virtual_cluster_reconciliations_total` - Total number of reconciliation passes
//! - `virtual_cluster_reconciliation_errors_total` - Passes that ended in an error
//! - `virtual_cluster_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `virtual_cluster_requeues_total{reason}` - Requeues by reason (`scheduled`, `error-backoff`)
//! - `virtual_cluster_phase_waits_total{phase}` - Passes that stopped at a phase waiting for health
//! - `virtual_cluster_status_conflicts_total` - Status writes rejected by optimistic concurrency
//! - `virtual_cluster_credentials_generated_total{kind}` - Credential records issued
//! - `virtual_cluster_credentials_rotated_total{kind}` - Credential records rotated
//! - `virtual_cluster_credentials_deleted_total{kind}` - Credential records deleted
//! - `virtual_cluster_credential_gc_failures_total` - Garbage collection runs that failed

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "virtual_cluster_reconciliations_total",
        "Total number of reconciliation passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "virtual_cluster_reconciliation_errors_total",
        "Total number of reconciliation passes that ended in an error",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "virtual_cluster_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "virtual_cluster_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static PHASE_WAITS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "virtual_cluster_phase_waits_total",
            "Total number of passes that stopped at a phase waiting for health",
        ),
        &["phase"],
    )
    .expect("Failed to create PHASE_WAITS_TOTAL metric - this should never happen")
});

static STATUS_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "virtual_cluster_status_conflicts_total",
        "Total number of status writes rejected with a conflict",
    )
    .expect("Failed to create STATUS_CONFLICTS_TOTAL metric - this should never happen")
});

static CREDENTIALS_GENERATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "virtual_cluster_credentials_generated_total",
            "Total number of credential records issued by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create CREDENTIALS_GENERATED_TOTAL metric - this should never happen")
});

static CREDENTIALS_ROTATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "virtual_cluster_credentials_rotated_total",
            "Total number of credential records rotated by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create CREDENTIALS_ROTATED_TOTAL metric - this should never happen")
});

static CREDENTIALS_DELETED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "virtual_cluster_credentials_deleted_total",
            "Total number of credential records deleted by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create CREDENTIALS_DELETED_TOTAL metric - this should never happen")
});

static CREDENTIAL_GC_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "virtual_cluster_credential_gc_failures_total",
        "Total number of credential garbage collection runs that failed",
    )
    .expect("Failed to create CREDENTIAL_GC_FAILURES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate metric names"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PHASE_WAITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_GENERATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_ROTATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIAL_GC_FAILURES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_phase_waits(phase: &str) {
    PHASE_WAITS_TOTAL.with_label_values(&[phase]).inc();
}

pub fn increment_status_conflicts() {
    STATUS_CONFLICTS_TOTAL.inc();
}

pub fn increment_credentials_generated(kind: &str) {
    CREDENTIALS_GENERATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_credentials_rotated(kind: &str) {
    CREDENTIALS_ROTATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_credentials_deleted(kind: &str) {
    CREDENTIALS_DELETED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_credential_gc_failures() {
    CREDENTIAL_GC_FAILURES_TOTAL.inc();
}

/// Current value of the GC failure counter
pub fn credential_gc_failures() -> u64 {
    CREDENTIAL_GC_FAILURES_TOTAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // Registration happens once per process; a second call reports duplicates
        let _ = register_metrics();
        assert!(!REGISTRY.gather().is_empty());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        assert_eq!(RECONCILIATIONS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_requeues_are_labelled_by_reason() {
        let before = REQUEUES_TOTAL.with_label_values(&["not_ready"]).get();
        increment_requeues("not_ready");
        increment_requeues("resync");
        assert_eq!(
            REQUEUES_TOTAL.with_label_values(&["not_ready"]).get(),
            before + 1u64
        );
    }

    #[test]
    fn test_credential_counters_are_labelled_by_kind() {
        let before = CREDENTIALS_ROTATED_TOTAL.with_label_values(&["ca"]).get();
        increment_credentials_rotated("ca");
        assert_eq!(
            CREDENTIALS_ROTATED_TOTAL.with_label_values(&["ca"]).get(),
            before + 1u64
        );
    }

    #[test]
    fn test_increment_credential_gc_failures() {
        let before = credential_gc_failures();
        increment_credential_gc_failures();
        assert!(credential_gc_failures() > before);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration(1.5);
        // Histogram observation has no return value to check
    }
}
