//! # VirtualCluster Status
//!
//! Status types tracking the last operation, conditions and credential rotation.

use serde::{Deserialize, Serialize};

/// Status of the VirtualCluster resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualClusterStatus {
    /// Last operation performed by the operator
    #[serde(default)]
    pub last_operation: Option<LastOperation>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Generation the last operation was computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Credential rotation progress
    #[serde(default)]
    pub credentials: Option<CredentialsStatus>,
}

/// Kind of the last operation
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
pub enum OperationType {
    Reconcile,
    Delete,
}

/// Top-level state machine: `Pending → Progressing → Succeeded | Error`
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
pub enum OperationState {
    Pending,
    Progressing,
    Succeeded,
    Error,
}

impl OperationState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "Pending",
            OperationState::Progressing => "Progressing",
            OperationState::Succeeded => "Succeeded",
            OperationState::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    pub r#type: OperationType,
    pub state: OperationState,
    /// Human-readable description; on failure carries the underlying error verbatim
    pub description: String,
    /// Percentage of phases completed (0-100)
    pub progress: i32,
    /// RFC3339 time of the last write, bumped on every pass
    pub last_update_time: String,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the status flipped
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Last time the condition was written
    #[serde(default)]
    pub last_update_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsStatus {
    #[serde(default)]
    pub certificate_authorities: Option<CredentialRotation>,
    #[serde(default)]
    pub service_account_key: Option<CredentialRotation>,
}

/// Progress of a two-step credential rotation
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRotation {
    pub phase: RotationPhase,
    #[serde(default)]
    pub last_initiation_time: Option<String>,
    #[serde(default)]
    pub last_completion_time: Option<String>,
}

/// Rotation phases: new material is trusted next to the old one while `Preparing`/`Prepared`,
/// old material is retired while `Completing`
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
pub enum RotationPhase {
    Preparing,
    Prepared,
    Completing,
    Completed,
}
