//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Requeue delay while a phase reports not-ready (seconds)
    pub requeue_delay_secs: u64,
    /// Upper bound for one reconciliation pass (seconds)
    /// The pass is cancelled at the next external call boundary once exceeded
    pub pass_timeout_secs: u64,
    /// Status write attempts after optimistic-concurrency conflicts
    pub status_conflict_retries: u32,
    /// Fibonacci backoff minimum for failed passes (minutes)
    pub backoff_min_minutes: u64,
    /// Fibonacci backoff maximum for failed passes (minutes)
    pub backoff_max_minutes: u64,
    /// Exponential backoff starting value for watch stream errors (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value for watch stream errors (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Maximum concurrent reconciliations (worker pool size)
    pub max_concurrent_reconciliations: u16,
    /// Value of the `manager-identity` label on credential records
    pub manager_identity: String,
    /// Registry control plane images are pulled from
    pub image_registry: String,
    /// Namespace the operator runs in
    pub controller_namespace: String,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            requeue_delay_secs: DEFAULT_REQUEUE_DELAY_SECS,
            pass_timeout_secs: DEFAULT_PASS_TIMEOUT_SECS,
            status_conflict_retries: DEFAULT_STATUS_CONFLICT_RETRIES,
            backoff_min_minutes: DEFAULT_BACKOFF_MIN_MINUTES,
            backoff_max_minutes: DEFAULT_BACKOFF_MAX_MINUTES,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            manager_identity: DEFAULT_MANAGER_IDENTITY.to_string(),
            image_registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            controller_namespace: "octopilot-system".to_string(),
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            requeue_delay_secs: env_var_or_default(
                "REQUEUE_DELAY_SECS",
                DEFAULT_REQUEUE_DELAY_SECS,
            ),
            pass_timeout_secs: env_var_or_default("PASS_TIMEOUT_SECS", DEFAULT_PASS_TIMEOUT_SECS),
            status_conflict_retries: env_var_or_default(
                "STATUS_CONFLICT_RETRIES",
                DEFAULT_STATUS_CONFLICT_RETRIES,
            ),
            backoff_min_minutes: env_var_or_default(
                "BACKOFF_MIN_MINUTES",
                DEFAULT_BACKOFF_MIN_MINUTES,
            ),
            backoff_max_minutes: env_var_or_default(
                "BACKOFF_MAX_MINUTES",
                DEFAULT_BACKOFF_MAX_MINUTES,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            manager_identity: env_var_or_default_str("MANAGER_IDENTITY", DEFAULT_MANAGER_IDENTITY),
            image_registry: env_var_or_default_str("IMAGE_REGISTRY", DEFAULT_IMAGE_REGISTRY),
            controller_namespace: env_var_or_default_str("POD_NAMESPACE", "octopilot-system"),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get requeue delay duration for not-ready phases
    #[must_use]
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_secs)
    }

    /// Get the per-pass timeout
    #[must_use]
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}

/// Server configuration for the metrics and probe endpoints
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the HTTP server binds
    pub metrics_port: u16,
    /// How long to wait for the server to become ready (seconds)
    pub startup_timeout_secs: u64,
    /// Readiness poll interval (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
