//! kube-backed ObjectStore

use crds::{NVIDIADriver, NVIDIADriverStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::Client;
use tracing::debug;

use crate::error::StoreError;
use crate::store_trait::ObjectStore;

/// ObjectStore backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl std::fmt::Debug for KubeObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeObjectStore").finish_non_exhaustive()
    }
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

fn object_name(object: &DynamicObject) -> Result<&str, StoreError> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| StoreError::InvalidObject("object has no metadata.name".to_string()))
}

#[async_trait::async_trait]
impl ObjectStore for KubeObjectStore {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, StoreError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(nodes.items)
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.dynamic_api(resource, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let objects = self
            .dynamic_api(resource, namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(objects.items)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        debug!(kind = %resource.kind, name = %object_name(object)?, "Creating object");
        let api = self.dynamic_api(resource, object.metadata.namespace.as_deref());
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(object)?;
        debug!(kind = %resource.kind, name = %name, "Replacing object");
        let api = self.dynamic_api(resource, object.metadata.namespace.as_deref());
        Ok(api.replace(name, &PostParams::default(), object).await?)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        match self
            .dynamic_api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => match StoreError::from(err) {
                StoreError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_drivers(&self) -> Result<Vec<NVIDIADriver>, StoreError> {
        let api: Api<NVIDIADriver> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_driver_status(
        &self,
        name: &str,
        status: &NVIDIADriverStatus,
    ) -> Result<(), StoreError> {
        let api: Api<NVIDIADriver> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn server_version(&self) -> Result<String, StoreError> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }
}
