//! Object store errors

use thiserror::Error;

/// Errors that can occur when reading or writing cluster objects
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with another writer
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency check failed (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing identifying fields or has an invalid shape
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        let classified = match &err {
            kube::Error::Api(status) if status.code == 404 => {
                Some(StoreError::NotFound(status.message.clone()))
            }
            kube::Error::Api(status) if status.code == 409 && status.reason == "AlreadyExists" => {
                Some(StoreError::AlreadyExists(status.message.clone()))
            }
            kube::Error::Api(status) if status.code == 409 => {
                Some(StoreError::Conflict(status.message.clone()))
            }
            _ => None,
        };
        match classified {
            Some(classified) => classified,
            None => StoreError::Kube(err),
        }
    }
}
