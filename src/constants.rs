//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the `VirtualCluster` resource
pub const API_GROUP: &str = "operator.octopilot.io";

/// Finalizer gating deletion of a `VirtualCluster`
pub const FINALIZER: &str = "operator.octopilot.io/virtual-cluster";

/// Annotation carrying a one-shot operation request
/// Values: `reconcile`, `rotate-credentials-start`, `rotate-credentials-complete`
pub const OPERATION_ANNOTATION: &str = "operator.octopilot.io/operation";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "virtual-cluster-operator";

/// Default identity written to the `manager-identity` label of credential records
pub const DEFAULT_MANAGER_IDENTITY: &str = "virtual-cluster-operator";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue delay while a phase waits for health (seconds)
pub const DEFAULT_REQUEUE_DELAY_SECS: u64 = 5;

/// Default resync interval after a successful pass
pub const DEFAULT_SYNC_INTERVAL: &str = "5m";

/// Upper bound for a single reconciliation pass (seconds)
pub const DEFAULT_PASS_TIMEOUT_SECS: u64 = 120;

/// Attempts to write status after optimistic-concurrency conflicts
pub const DEFAULT_STATUS_CONFLICT_RETRIES: u32 = 3;

/// Fibonacci backoff minimum for failed passes (minutes)
pub const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;

/// Fibonacci backoff maximum for failed passes (minutes)
pub const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 10;

/// Default exponential backoff starting value for watch errors (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch errors (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default maximum number of resources reconciled in parallel
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Registry control plane images are pulled from
pub const DEFAULT_IMAGE_REGISTRY: &str = "registry.k8s.io";

/// Minimum resync interval (seconds)
pub const MIN_SYNC_INTERVAL_SECS: u64 = 30;
