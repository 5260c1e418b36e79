//! Virtual Cluster Operator Library
//!
//! Bootstraps nested Kubernetes control planes from `VirtualCluster`
//! resources: a phase orchestrator drives the control plane components in
//! order, and a credential manager issues, rotates and collects the PKI and
//! tokens they share.
//!
//! ## Quick Start
//!
//! ```rust
//! use virtual_cluster_operator::prelude::*;
//! ```

pub mod components;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod credentials;
pub mod observability;
pub mod prelude;
pub mod runtime;
