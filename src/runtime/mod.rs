//! # Runtime
//!
//! Process lifecycle of the operator binary.
//!
//! - `initialization`: crypto provider, logging, metrics, server and client setup
//! - `watch_loop`: the kube-runtime controller and its restart loop
//! - `error_policy`: backoff for failed passes and watch error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
