//! ObjectStore trait for mocking
//!
//! This trait abstracts the Kubernetes API surface the driver controller
//! needs. `KubeObjectStore` implements it on top of a kube client, and tests
//! use `MockObjectStore`.

use crds::{NVIDIADriver, NVIDIADriverStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::{ApiResource, DynamicObject};

use crate::error::StoreError;

/// Trait for cluster object operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// `namespace` is `None` for cluster-scoped resources.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// List nodes matching a label selector
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, StoreError>;

    /// Fetch one object, `Ok(None)` when it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError>;

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Create an object; `StoreError::AlreadyExists` if it is already present
    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Replace an object; the object's resourceVersion is checked when set
    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Delete an object; deleting an absent object succeeds
    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    async fn list_drivers(&self) -> Result<Vec<NVIDIADriver>, StoreError>;

    async fn patch_driver_status(
        &self,
        name: &str,
        status: &NVIDIADriverStatus,
    ) -> Result<(), StoreError>;

    /// Kubernetes server version (git version, e.g. `v1.30.2`)
    async fn server_version(&self) -> Result<String, StoreError>;
}
