//! # Reconciler
//!
//! Bridges the kube-runtime controller and the phase orchestrator.
//!
//! - `reconcile.rs` - One pass per trigger, decision mapped to an `Action`
//! - `trigger.rs` - Separates real triggers from status echoes
//! - `types.rs` - Reconciler context, errors, trigger sources and backoff state

pub mod reconcile;
pub mod trigger;
pub mod types;

pub use reconcile::reconcile;
pub use trigger::classify;
pub use types::{BackoffState, Reconciler, ReconcilerError, TriggerSource};
