//! Controller-specific error types.
//!
//! Errors fall into two groups. Input errors (bad image references, missing
//! configuration objects, no matching nodes, conflicting selectors, render
//! failures) need a change to the NVIDIADriver or the cluster before a retry
//! can succeed. Transient errors (store failures, deadline) are retried as a
//! whole pass after the requeue delay.

use std::time::Duration;

use object_store::StoreError;
use thiserror::Error;

use crate::render::RenderError;

/// Errors that can occur in the NVIDIA driver controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object store (Kubernetes API) error
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// Manifest rendering failed
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Kubernetes client construction failed
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Image reference could not be built or has a malformed tag
    #[error("Invalid image reference: {0}")]
    InvalidImage(String),

    /// A referenced ConfigMap or Secret does not exist
    #[error("Missing configuration object: {0}")]
    MissingConfig(String),

    /// No GPU node matches the driver's selector
    #[error("No node pools found for NVIDIADriver {0}")]
    NoNodePools(String),

    /// Another NVIDIADriver already selects some of the same nodes
    #[error("Node selector conflict: {0}")]
    NodeSelectorConflict(String),

    /// NVIDIADriver spec is unusable as written
    #[error("Invalid NVIDIADriver spec: {0}")]
    InvalidSpec(String),

    /// A rendered or live object does not have the expected shape
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// The reconciliation pass ran out of time
    #[error("Reconciliation deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Probe / metrics server failure
    #[error("Probe server error: {0}")]
    Probe(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Transient errors are retried after the requeue delay without being
    /// reported as an error condition on the NVIDIADriver.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Store(err) => !matches!(err, StoreError::InvalidObject(_)),
            ControllerError::Kube(_) | ControllerError::DeadlineExceeded(_) => true,
            _ => false,
        }
    }

    /// Short machine readable reason used in status conditions and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::Store(_) | ControllerError::Kube(_) => "StoreError",
            ControllerError::Render(_) => "RenderFailed",
            ControllerError::InvalidConfig(_) => "InvalidConfig",
            ControllerError::InvalidImage(_) => "InvalidImage",
            ControllerError::MissingConfig(_) => "MissingConfig",
            ControllerError::NoNodePools(_) => "NoNodePools",
            ControllerError::NodeSelectorConflict(_) => "NodeSelectorConflict",
            ControllerError::InvalidSpec(_) => "InvalidSpec",
            ControllerError::InvalidObject(_) | ControllerError::Serialization(_) => {
                "InvalidObject"
            }
            ControllerError::DeadlineExceeded(_) => "DeadlineExceeded",
            ControllerError::Probe(_) | ControllerError::Watch(_) => "InternalError",
        }
    }
}
