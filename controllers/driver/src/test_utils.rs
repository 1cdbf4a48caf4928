//! Test utilities for unit testing the reconciliation core
//!
//! Fixtures for nodes, NVIDIADrivers, configuration and DaemonSet status.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crds::{NVIDIADriver, NVIDIADriverSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::api::ObjectMeta;
use serde_json::{json, Value};

use crate::config::ControllerConfig;
use crate::nodepool::{GPU_PRESENT_LABEL, KERNEL_VERSION_LABEL, OS_RELEASE_LABEL, OS_VERSION_LABEL, RHCOS_VERSION_LABEL};

pub const TEST_NAMESPACE: &str = "gpu-operator";
pub const TEST_MANAGER_IMAGE: &str = "nvcr.io/nvidia/cloud-native/k8s-driver-manager:v0.6.8";

/// GPU node with the OS and kernel discovery labels set
pub fn gpu_node(name: &str, os_release: &str, os_version: &str, kernel: &str) -> Node {
    let labels = BTreeMap::from([
        (GPU_PRESENT_LABEL.to_string(), "true".to_string()),
        (OS_RELEASE_LABEL.to_string(), os_release.to_string()),
        (OS_VERSION_LABEL.to_string(), os_version.to_string()),
        (KERNEL_VERSION_LABEL.to_string(), kernel.to_string()),
    ]);
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// RHCOS node carrying the OSTree image version label
pub fn rhcos_node(name: &str, rhcos_version: &str) -> Node {
    let mut node = gpu_node(name, "rhcos", "4.14", "5.14.0-284.40.1.el9_2.x86_64");
    if let Some(labels) = node.metadata.labels.as_mut() {
        labels.insert(RHCOS_VERSION_LABEL.to_string(), rhcos_version.to_string());
    }
    node
}

pub fn with_label(mut node: Node, key: &str, value: &str) -> Node {
    node.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    node
}

pub fn driver_spec() -> NVIDIADriverSpec {
    NVIDIADriverSpec {
        repository: "nvcr.io/nvidia".to_string(),
        image: "driver".to_string(),
        version: "550.90.07".to_string(),
        ..Default::default()
    }
}

/// NVIDIADriver with a uid, as it would come back from the API server
pub fn make_driver(name: &str, spec: NVIDIADriverSpec) -> NVIDIADriver {
    let mut driver = NVIDIADriver::new(name, spec);
    driver.metadata.uid = Some(format!("uid-{name}"));
    driver.metadata.generation = Some(1);
    driver
}

/// Set a deletion timestamp, as the API server does on delete
pub fn mark_deleting(mut driver: NVIDIADriver) -> NVIDIADriver {
    driver.metadata.deletion_timestamp = serde_json::from_value(json!("2025-01-01T00:00:00Z")).ok();
    driver
}

pub fn manifests_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("manifests/state-driver")
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        operator_namespace: TEST_NAMESPACE.to_string(),
        driver_manager_image: Some(TEST_MANAGER_IMAGE.to_string()),
        manifests_dir: manifests_dir(),
        reconcile_timeout: Duration::from_secs(10),
        requeue_delay: Duration::from_secs(5),
        concurrency: 1,
        probe_addr: ([127, 0, 0, 1], 0).into(),
    }
}

pub fn config_map(name: &str, keys: &[&str]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(keys.iter().map(|key| (key.to_string(), "content".to_string())).collect()),
        ..Default::default()
    }
}

/// DaemonSet status of a fully rolled out DaemonSet
pub fn rolled_out_status(desired: i64, generation: i64) -> Value {
    json!({
        "observedGeneration": generation,
        "desiredNumberScheduled": desired,
        "currentNumberScheduled": desired,
        "updatedNumberScheduled": desired,
        "numberAvailable": desired,
        "numberReady": desired,
        "numberUnavailable": 0,
        "numberMisscheduled": 0,
    })
}
