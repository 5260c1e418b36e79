//! # Controller
//!
//! Core controller modules for the virtual cluster operator.
//!
//! - `backoff`: Fibonacci backoff for failed passes
//! - `orchestrator`: Phase orchestrator and its decision core
//! - `reconciler`: Bridge between kube-runtime and the orchestrator
//! - `resource`: Narrow client for the `VirtualCluster` API
//! - `server`: HTTP server for metrics and health checks
//! - `validation`: Resource validation

pub mod backoff;
pub mod orchestrator;
pub mod reconciler;
pub mod resource;
pub mod server;
pub mod validation;
