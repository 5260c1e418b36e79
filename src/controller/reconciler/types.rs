//! # Types
//!
//! Core types for the reconciler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use kube::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::orchestrator::{DefaultFlow, Orchestrator, PassError};
use crate::controller::resource::KubeResourceClient;
use crate::credentials::KubeSecretStore;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] PassError),
}

/// Why a pass was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Operation annotation on the resource
    Operation,
    /// Generation moved past the observed generation
    SpecChange,
    /// Requeue timer or periodic resync
    TimerBased,
    /// Deletion timestamp set
    Deletion,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Operation => "operation",
            TriggerSource::SpecChange => "spec-change",
            TriggerSource::TimerBased => "timer-based",
            TriggerSource::Deletion => "deletion",
        }
    }
}

/// Backoff state for one resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
    /// Earliest time a timer-triggered retry may run
    pub retry_at: Option<DateTime<Utc>>,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
            retry_at: None,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    /// Count a failure and hold retries back for the next Fibonacci delay
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> u64 {
        self.increment_error();
        let seconds = self.backoff.next_backoff_seconds();
        self.retry_at = chrono::Duration::from_std(Duration::from_secs(seconds))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay));
        seconds
    }

    /// Time left before a retry is allowed, `None` once it has elapsed
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let retry_at = self.retry_at?;
        (retry_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.retry_at = None;
        self.backoff.reset();
    }
}

#[derive(Clone)]
pub struct Reconciler {
    pub orchestrator: Arc<Orchestrator>,
    /// Keyed by resource name; owned by the error policy, cleared on success
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler backed by the Kubernetes API and the default flow
    #[must_use]
    pub fn new(client: Client, config: ControllerConfig, shutdown: CancellationToken) -> Self {
        let orchestrator = Orchestrator::new(
            Arc::new(KubeResourceClient::new(client.clone())),
            Arc::new(KubeSecretStore::new(client.clone())),
            Arc::new(DefaultFlow::new(client)),
            config,
            shutdown,
        );
        Self::with_orchestrator(orchestrator)
    }

    #[must_use]
    pub fn with_orchestrator(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        self.orchestrator.config()
    }

    /// Record a failure and return the delay before the next attempt
    pub fn next_backoff(&self, resource: &str) -> (u64, u32) {
        let config = self.config();
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(resource.to_string()).or_insert_with(|| {
            BackoffState::new(config.backoff_min_minutes, config.backoff_max_minutes)
        });
        let seconds = state.record_failure(Utc::now());
        (seconds, state.error_count)
    }

    /// Backoff still pending for `resource` after a failed pass
    #[must_use]
    pub fn backoff_remaining(&self, resource: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .and_then(|state| state.remaining(now))
    }

    pub fn reset_backoff(&self, resource: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        states.remove(resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_790_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_failure_holds_retries_for_the_backoff() {
        let mut state = BackoffState::new(1, 10);
        assert_eq!(state.remaining(at(0)), None);

        assert_eq!(state.record_failure(at(0)), 60);
        assert_eq!(state.remaining(at(20)), Some(Duration::from_secs(40)));
        assert_eq!(state.remaining(at(60)), None);

        assert_eq!(state.record_failure(at(60)), 60);
        assert_eq!(state.record_failure(at(120)), 120);
        assert_eq!(state.error_count, 3);
        assert_eq!(state.remaining(at(180)), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_reset_clears_pending_retry() {
        let mut state = BackoffState::new(1, 10);
        state.record_failure(at(0));
        state.reset();
        assert_eq!(state.remaining(at(1)), None);
        assert_eq!(state.error_count, 0);
    }
}
