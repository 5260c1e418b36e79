//! # Error Policy
//!
//! Backoff for failed passes and classification of watch stream errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kube_runtime::controller::Action;
use tracing::{error, info, warn, Instrument};

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::VirtualCluster;
use crate::observability::metrics;

/// Requeue a failed pass after the resource's next Fibonacci delay
pub fn handle_reconciliation_error(
    obj: Arc<VirtualCluster>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {}", name, error);
    metrics::increment_reconciliation_errors();

    let (backoff_seconds, error_count) = ctx.next_backoff(name);
    info!(
        backoff_secs = backoff_seconds,
        error_count, "Retrying with Fibonacci backoff"
    );
    metrics::increment_requeues("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// What the watch loop should do with a stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

impl WatchErrorKind {
    /// Classify by the rendered error; 404 is checked first since its chain may mention 401-like text
    #[must_use]
    pub fn classify(error: &str) -> Self {
        let not_found =
            error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
        if not_found {
            WatchErrorKind::NotFound
        } else if error.contains("401") || error.contains("Unauthorized") {
            WatchErrorKind::Unauthorized
        } else if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            WatchErrorKind::Expired
        } else if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            WatchErrorKind::Throttled
        } else {
            WatchErrorKind::Other
        }
    }
}

/// Handle a watch stream error
///
/// Returns `None` to drop the event and let the stream restart, `Some(())` to
/// keep going.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );

    async move {
        match WatchErrorKind::classify(error_string) {
            WatchErrorKind::Unauthorized => {
                error!("Watch authentication failed (401); check the operator's RBAC bindings and service account token");
                warn!(
                    delay_secs = watch_restart_delay.as_secs(),
                    "Waiting before retrying watch"
                );
                tokio::time::sleep(watch_restart_delay).await;
                None
            }
            WatchErrorKind::Expired => {
                warn!(error_type = "410", "watch.error.resource_version_expired");
                None
            }
            WatchErrorKind::Throttled => {
                let current = backoff.load(Ordering::Relaxed);
                warn!(
                    backoff_ms = current,
                    "API server throttling or reinitializing storage (429), backing off"
                );
                tokio::time::sleep(Duration::from_millis(current)).await;
                backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
                None
            }
            WatchErrorKind::NotFound => {
                warn!(
                    "Resource not found (404); normal after deletion, otherwise check that the VirtualCluster CRD is installed. Error: {}",
                    error_string
                );
                Some(())
            }
            WatchErrorKind::Other => {
                error!("Controller stream error: {}", error_string);
                tokio::time::sleep(watch_restart_delay).await;
                None
            }
        }
    }
    .instrument(error_span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_errors() {
        assert_eq!(
            WatchErrorKind::classify("ObjectNotFound: virtualclusters not found"),
            WatchErrorKind::NotFound
        );
        assert_eq!(
            WatchErrorKind::classify("WatchFailed: 401 Unauthorized"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            WatchErrorKind::classify("too old resource version: 123 (456)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            WatchErrorKind::classify("TooManyRequests: storage is (re)initializing"),
            WatchErrorKind::Throttled
        );
        assert_eq!(
            WatchErrorKind::classify("connection reset by peer"),
            WatchErrorKind::Other
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_doubles_backoff_up_to_max() {
        let backoff = Arc::new(AtomicU64::new(1000));
        let result =
            handle_watch_stream_error("429 TooManyRequests", &backoff, 1500, Duration::ZERO).await;
        assert_eq!(result, None);
        assert_eq!(backoff.load(Ordering::Relaxed), 1500);
    }

    #[tokio::test]
    async fn test_not_found_keeps_stream() {
        let backoff = Arc::new(AtomicU64::new(1000));
        let result =
            handle_watch_stream_error("404 not found", &backoff, 1500, Duration::ZERO).await;
        assert_eq!(result, Some(()));
    }
}
