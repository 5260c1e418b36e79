//! # Configuration
//!
//! Operator configuration loaded from the environment.

mod controller;

pub use controller::{ControllerConfig, ServerConfig};
