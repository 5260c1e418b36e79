//! # Validation
//!
//! Validates `VirtualCluster` resources before a pass touches anything.

mod duration;
mod kubernetes;
mod spec;

pub use duration::{parse_kubernetes_duration, validate_duration_interval};
pub use kubernetes::{validate_dns_subdomain, validate_kubernetes_namespace};
pub use spec::{sync_interval, validate_virtual_cluster};
