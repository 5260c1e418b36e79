//! # CRD Generator
//!
//! Prints the `VirtualCluster` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/virtualcluster.yaml
//! ```

use kube::core::CustomResourceExt;
use virtual_cluster_operator::crd::VirtualCluster;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&VirtualCluster::crd())?);
    Ok(())
}
