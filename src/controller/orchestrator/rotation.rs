//! # Credential Rotation
//!
//! Two-step rotation requested through the operation annotation:
//!
//! 1. `rotate-credentials-start`: new CAs and a new service account key are
//!    issued next to the old ones (`Preparing`, then `Prepared` after a
//!    successful pass).
//! 2. `rotate-credentials-complete`: old material is retired (`Completing`,
//!    then `Completed`).
//!
//! The initiation time of a rotation is the epoch folded into the checksum of
//! the rotated configs, which is what makes the manager issue new material.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::components::{RotationContext, CERTIFICATE_AUTHORITIES, SERVICE_ACCOUNT_KEY};
use crate::controller::orchestrator::decision::timestamp;
use crate::crd::{CredentialRotation, CredentialsStatus, RotationPhase};

/// One-shot operation requested on the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Reconcile,
    RotateCredentialsStart,
    RotateCredentialsComplete,
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "reconcile" => Ok(Operation::Reconcile),
            "rotate-credentials-start" => Ok(Operation::RotateCredentialsStart),
            "rotate-credentials-complete" => Ok(Operation::RotateCredentialsComplete),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

fn phases(credentials: &CredentialsStatus) -> [Option<RotationPhase>; 2] {
    [
        credentials.certificate_authorities.as_ref().map(|r| r.phase),
        credentials.service_account_key.as_ref().map(|r| r.phase),
    ]
}

/// Apply a requested operation to the rotation status
///
/// # Errors
///
/// Returns the reason when the operation is not allowed in the current phase.
pub fn apply_operation(
    credentials: Option<CredentialsStatus>,
    operation: Operation,
    now: DateTime<Utc>,
) -> Result<Option<CredentialsStatus>, String> {
    match operation {
        Operation::Reconcile => Ok(credentials),
        Operation::RotateCredentialsStart => {
            let mut credentials = credentials.unwrap_or_default();
            let in_progress = phases(&credentials)
                .into_iter()
                .flatten()
                .find(|p| *p != RotationPhase::Completed);
            if let Some(phase) = in_progress {
                return Err(format!("credential rotation is already in phase {phase:?}"));
            }
            let start = |previous: Option<CredentialRotation>| CredentialRotation {
                phase: RotationPhase::Preparing,
                last_initiation_time: Some(timestamp(now)),
                last_completion_time: previous.and_then(|p| p.last_completion_time),
            };
            credentials.certificate_authorities =
                Some(start(credentials.certificate_authorities.take()));
            credentials.service_account_key = Some(start(credentials.service_account_key.take()));
            Ok(Some(credentials))
        }
        Operation::RotateCredentialsComplete => {
            let Some(mut credentials) = credentials else {
                return Err("no credential rotation has been started".to_string());
            };
            if phases(&credentials) != [Some(RotationPhase::Prepared); 2] {
                return Err(format!(
                    "credential rotation can only be completed once prepared (phases: {:?})",
                    phases(&credentials)
                ));
            }
            for rotation in [
                &mut credentials.certificate_authorities,
                &mut credentials.service_account_key,
            ]
            .into_iter()
            .flatten()
            {
                rotation.phase = RotationPhase::Completing;
            }
            Ok(Some(credentials))
        }
    }
}

/// Advance transient phases after a fully successful pass
#[must_use]
pub fn advance(
    credentials: Option<CredentialsStatus>,
    now: DateTime<Utc>,
) -> Option<CredentialsStatus> {
    let mut credentials = credentials?;
    for rotation in [
        &mut credentials.certificate_authorities,
        &mut credentials.service_account_key,
    ]
    .into_iter()
    .flatten()
    {
        match rotation.phase {
            RotationPhase::Preparing => rotation.phase = RotationPhase::Prepared,
            RotationPhase::Completing => {
                rotation.phase = RotationPhase::Completed;
                rotation.last_completion_time = Some(timestamp(now));
            }
            RotationPhase::Prepared | RotationPhase::Completed => {}
        }
    }
    Some(credentials)
}

/// Config name -> rotation epoch for every rotated config
#[must_use]
pub fn epochs(credentials: Option<&CredentialsStatus>) -> BTreeMap<String, String> {
    let mut epochs = BTreeMap::new();
    let Some(credentials) = credentials else {
        return epochs;
    };
    if let Some(epoch) = credentials
        .certificate_authorities
        .as_ref()
        .and_then(|r| r.last_initiation_time.clone())
    {
        for ca in CERTIFICATE_AUTHORITIES {
            epochs.insert(ca.to_string(), epoch.clone());
        }
    }
    if let Some(epoch) = credentials
        .service_account_key
        .as_ref()
        .and_then(|r| r.last_initiation_time.clone())
    {
        epochs.insert(SERVICE_ACCOUNT_KEY.to_string(), epoch);
    }
    epochs
}

#[must_use]
pub fn context(credentials: Option<&CredentialsStatus>) -> RotationContext {
    RotationContext {
        certificate_authorities: credentials
            .and_then(|c| c.certificate_authorities.as_ref())
            .map(|r| r.phase),
        service_account_key: credentials
            .and_then(|c| c.service_account_key.as_ref())
            .map(|r| r.phase),
    }
}
