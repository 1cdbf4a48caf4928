//! Cluster facts discovered once per reconciliation pass.
//!
//! OpenShift is detected through the `ClusterVersion` object. On OpenShift
//! the driver-toolkit ImageStream maps RHCOS versions to toolkit images and
//! the cluster `Proxy` object supplies proxy settings for the driver
//! containers.

use std::collections::BTreeMap;

use kube::api::ApiResource;
use kube::core::GroupVersionKind;
use object_store::ObjectStore;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::deadline::Deadline;
use crate::error::ControllerError;

const OPENSHIFT_NAMESPACE: &str = "openshift";
const DRIVER_TOOLKIT_IMAGESTREAM: &str = "driver-toolkit";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProxySettings {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxySettings {
    pub fn is_empty(&self) -> bool {
        self.http_proxy.is_none() && self.https_proxy.is_none() && self.no_proxy.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterFacts {
    pub kubernetes_version: String,
    /// Set when running on OpenShift
    pub openshift_version: Option<String>,
    /// RHCOS version -> driver-toolkit image
    pub toolkit_images: BTreeMap<String, String>,
    pub proxy: Option<ProxySettings>,
}

pub fn cluster_version_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterVersion"),
        "clusterversions",
    )
}

pub fn proxy_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("config.openshift.io", "v1", "Proxy"),
        "proxies",
    )
}

pub fn image_stream_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("image.openshift.io", "v1", "ImageStream"),
        "imagestreams",
    )
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl ClusterFacts {
    /// Immutable-OS platform: nodes run RHCOS and drivers build against the toolkit
    pub fn is_openshift(&self) -> bool {
        self.openshift_version.is_some()
    }

    pub fn toolkit_image(&self, rhcos_version: &str) -> Option<&str> {
        self.toolkit_images.get(rhcos_version).map(String::as_str)
    }

    pub async fn discover(store: &dyn ObjectStore, deadline: &Deadline) -> Result<Self, ControllerError> {
        let mut facts = ClusterFacts {
            kubernetes_version: deadline.run(store.server_version()).await?,
            ..Default::default()
        };

        let cluster_version = deadline
            .run(store.get(&cluster_version_resource(), None, "version"))
            .await?;
        let Some(cluster_version) = cluster_version else {
            debug!(kubernetes_version = %facts.kubernetes_version, "ClusterVersion not found, not running on OpenShift");
            return Ok(facts);
        };
        facts.openshift_version = Some(
            text(&cluster_version.data, "/status/desired/version").unwrap_or_else(|| "unknown".to_string()),
        );

        if let Some(stream) = deadline
            .run(store.get(&image_stream_resource(), Some(OPENSHIFT_NAMESPACE), DRIVER_TOOLKIT_IMAGESTREAM))
            .await?
        {
            facts.toolkit_images = toolkit_images(&stream.data);
        }

        if let Some(proxy) = deadline.run(store.get(&proxy_resource(), None, "cluster")).await? {
            let settings = ProxySettings {
                http_proxy: text(&proxy.data, "/status/httpProxy").or_else(|| text(&proxy.data, "/spec/httpProxy")),
                https_proxy: text(&proxy.data, "/status/httpsProxy").or_else(|| text(&proxy.data, "/spec/httpsProxy")),
                no_proxy: text(&proxy.data, "/status/noProxy").or_else(|| text(&proxy.data, "/spec/noProxy")),
            };
            if !settings.is_empty() {
                facts.proxy = Some(settings);
            }
        }

        info!(
            kubernetes_version = %facts.kubernetes_version,
            openshift_version = ?facts.openshift_version,
            toolkit_images = facts.toolkit_images.len(),
            "Discovered OpenShift cluster"
        );
        Ok(facts)
    }
}

/// Toolkit images from the ImageStream tags; tags other than RHCOS versions
/// (`latest`) are ignored.
fn toolkit_images(stream: &Value) -> BTreeMap<String, String> {
    stream
        .pointer("/spec/tags")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|tag| {
            let name = text(tag, "/name")?;
            let image = text(tag, "/from/name")?;
            (name != "latest").then_some((name, image))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::DynamicObject;
    use object_store::MockObjectStore;
    use serde_json::json;
    use std::time::Duration;

    fn object(resource: &ApiResource, namespace: Option<&str>, name: &str, data: Value) -> DynamicObject {
        let mut object = DynamicObject::new(name, resource);
        object.metadata.namespace = namespace.map(str::to_string);
        object.data = data;
        object
    }

    #[tokio::test]
    async fn test_vanilla_kubernetes() {
        let store = MockObjectStore::new();
        store.set_server_version("v1.29.4");
        let facts = ClusterFacts::discover(&store, &Deadline::after(Duration::from_secs(5))).await.unwrap();
        assert_eq!(facts.kubernetes_version, "v1.29.4");
        assert!(!facts.is_openshift());
        assert!(facts.toolkit_images.is_empty());
        assert!(facts.proxy.is_none());
    }

    #[tokio::test]
    async fn test_openshift_facts() {
        let store = MockObjectStore::new();
        store.add_object(
            &cluster_version_resource(),
            object(&cluster_version_resource(), None, "version", json!({ "status": { "desired": { "version": "4.14.3" } } })),
        );
        store.add_object(
            &image_stream_resource(),
            object(
                &image_stream_resource(),
                Some("openshift"),
                "driver-toolkit",
                json!({ "spec": { "tags": [
                    { "name": "414.92.202310170514-0", "from": { "kind": "DockerImage", "name": "quay.io/openshift/dtk@sha256:abc" } },
                    { "name": "latest", "from": { "kind": "DockerImage", "name": "quay.io/openshift/dtk@sha256:abc" } }
                ] } }),
            ),
        );
        store.add_object(
            &proxy_resource(),
            object(&proxy_resource(), None, "cluster", json!({ "status": { "httpProxy": "http://proxy:3128", "noProxy": ".cluster.local" } })),
        );

        let facts = ClusterFacts::discover(&store, &Deadline::after(Duration::from_secs(5))).await.unwrap();
        assert_eq!(facts.openshift_version.as_deref(), Some("4.14.3"));
        assert_eq!(facts.toolkit_image("414.92.202310170514-0"), Some("quay.io/openshift/dtk@sha256:abc"));
        assert_eq!(facts.toolkit_images.len(), 1);
        let proxy = facts.proxy.unwrap();
        assert_eq!(proxy.http_proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(proxy.https_proxy, None);
    }
}
