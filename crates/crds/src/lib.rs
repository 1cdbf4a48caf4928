//! NVIDIA Driver CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the NVIDIA driver controller.

pub mod common;
pub mod nvidia_driver;

pub use common::*;
pub use nvidia_driver::*;
