//! Node pool partitioning.
//!
//! GPU nodes are grouped into pools that can share one driver build: same OS
//! id and version, plus the same kernel for precompiled drivers, or the same
//! RHCOS image version on OpenShift when the driver is built on the node.
//! Pools are recomputed on every pass and never stored.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use k8s_openapi::api::core::v1::Node;
use object_store::{format_selector, ObjectStore, StoreError};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

// Node Feature Discovery and GPU discovery labels
pub const GPU_PRESENT_LABEL: &str = "nvidia.com/gpu.present";
pub const OS_RELEASE_LABEL: &str = "feature.node.kubernetes.io/system-os_release.ID";
pub const OS_VERSION_LABEL: &str = "feature.node.kubernetes.io/system-os_release.VERSION_ID";
pub const KERNEL_VERSION_LABEL: &str = "feature.node.kubernetes.io/kernel-version.full";
pub const RHCOS_VERSION_LABEL: &str = "feature.node.kubernetes.io/system-os_release.OSTREE_VERSION";

static ARCH_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"x86_64(?:_64k)?|aarch64(?:_64k)?").expect("architecture pattern is valid")
});

/// A set of GPU nodes that share one driver build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodePool {
    /// `<os><version>`, plus `-<kernel>` for precompiled drivers
    pub name: String,
    /// Lowercased OS ID, e.g. `ubuntu`
    pub os_release: String,
    pub os_version: String,
    /// Full kernel version, only for precompiled drivers
    pub kernel_version: Option<String>,
    /// RHCOS image version, only for on-node builds on OpenShift
    pub rhcos_version: Option<String>,
    /// Labels every node of the pool carries; becomes the DaemonSet node selector
    pub node_selector: BTreeMap<String, String>,
}

impl NodePool {
    /// OS part of image tags, e.g. `ubuntu22.04`
    pub fn os_tag(&self) -> String {
        format!("{}{}", self.os_release, self.os_version)
    }

    /// Kernel version usable in an image tag
    pub fn sanitized_kernel_version(&self) -> Option<String> {
        self.kernel_version.as_deref().map(sanitize_kernel_version)
    }
}

/// Strip the architecture from a kernel version and make it tag-safe:
/// `5.14.0-284.30.1.el9_2.x86_64` becomes `5.14.0-284.30.1.el9.2`.
pub fn sanitize_kernel_version(kernel: &str) -> String {
    ARCH_SUFFIX
        .replace_all(kernel, "")
        .replace('_', ".")
        .trim_end_matches('.')
        .to_lowercase()
}

/// Base selector of an NVIDIADriver: GPU nodes plus the user's selector
pub fn driver_node_selector(user_selector: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut selector = user_selector.clone();
    selector.insert(GPU_PRESENT_LABEL.to_string(), "true".to_string());
    selector
}

fn label<'a>(labels: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    labels.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// Partition nodes into pools.
///
/// Nodes not matching `selector` are ignored; nodes missing a required label
/// are skipped with a warning. The result is deduplicated by pool name and
/// sorted by it.
pub fn partition_nodes(
    nodes: &[Node],
    selector: &BTreeMap<String, String>,
    use_precompiled: bool,
    immutable_os: bool,
) -> Vec<NodePool> {
    let mut pools: BTreeMap<String, NodePool> = BTreeMap::new();

    for node in nodes {
        let node_name = node.metadata.name.as_deref().unwrap_or("<unknown>");
        let empty = BTreeMap::new();
        let labels = node.metadata.labels.as_ref().unwrap_or(&empty);

        if label(labels, GPU_PRESENT_LABEL) != Some("true")
            || !selector.iter().all(|(k, v)| labels.get(k) == Some(v))
        {
            continue;
        }

        let (Some(os_release), Some(os_version)) =
            (label(labels, OS_RELEASE_LABEL), label(labels, OS_VERSION_LABEL))
        else {
            warn!(node = %node_name, "Skipping node without OS release labels");
            continue;
        };

        let mut node_selector = selector.clone();
        node_selector.insert(OS_RELEASE_LABEL.to_string(), os_release.to_string());
        node_selector.insert(OS_VERSION_LABEL.to_string(), os_version.to_string());

        let mut pool = NodePool {
            name: format!("{os_release}{os_version}"),
            os_release: os_release.to_string(),
            os_version: os_version.to_string(),
            kernel_version: None,
            rhcos_version: None,
            node_selector,
        };

        if use_precompiled {
            let Some(kernel) = label(labels, KERNEL_VERSION_LABEL) else {
                warn!(node = %node_name, "Skipping node without kernel version label");
                continue;
            };
            pool.node_selector
                .insert(KERNEL_VERSION_LABEL.to_string(), kernel.to_string());
            pool.name = format!("{}-{}", pool.name, sanitize_kernel_version(kernel));
            pool.kernel_version = Some(kernel.to_string());
        } else if immutable_os {
            let Some(rhcos) = label(labels, RHCOS_VERSION_LABEL) else {
                warn!(node = %node_name, "Skipping node without OS image version label");
                continue;
            };
            pool.node_selector
                .insert(RHCOS_VERSION_LABEL.to_string(), rhcos.to_string());
            pool.name = rhcos.to_string();
            pool.rhcos_version = Some(rhcos.to_string());
        }

        debug!(node = %node_name, pool = %pool.name, "Node assigned to pool");
        pools.entry(pool.name.clone()).or_insert(pool);
    }

    pools.into_values().collect()
}

/// List the selected GPU nodes and partition them into pools
pub async fn get_node_pools(
    store: &dyn ObjectStore,
    selector: &BTreeMap<String, String>,
    use_precompiled: bool,
    immutable_os: bool,
) -> Result<Vec<NodePool>, StoreError> {
    let nodes = store.list_nodes(&format_selector(selector)).await?;
    Ok(partition_nodes(&nodes, selector, use_precompiled, immutable_os))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::gpu_node;
    use std::collections::BTreeSet;

    fn base() -> BTreeMap<String, String> {
        driver_node_selector(&BTreeMap::new())
    }

    #[test]
    fn test_sanitize_kernel_version() {
        assert_eq!(sanitize_kernel_version("5.14.0-284.30.1.el9_2.x86_64"), "5.14.0-284.30.1.el9.2");
        assert_eq!(sanitize_kernel_version("5.4.0-150-generic"), "5.4.0-150-generic");
        assert_eq!(sanitize_kernel_version("5.14.0-427.el9.aarch64_64k"), "5.14.0-427.el9");
        assert_eq!(sanitize_kernel_version("6.8.0-1008-NVIDIA"), "6.8.0-1008-nvidia");
    }

    #[test]
    fn test_groups_by_os() {
        let nodes = vec![
            gpu_node("a", "ubuntu", "22.04", "5.15.0-91-generic"),
            gpu_node("b", "ubuntu", "22.04", "5.15.0-92-generic"),
            gpu_node("c", "rhel", "9.2", "5.14.0-284.30.1.el9_2.x86_64"),
        ];
        let pools = partition_nodes(&nodes, &base(), false, false);
        let names: Vec<_> = pools.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["rhel9.2", "ubuntu22.04"]);
        assert!(pools.iter().all(|p| p.kernel_version.is_none()));
        assert_eq!(pools[1].node_selector.get(OS_RELEASE_LABEL).map(String::as_str), Some("ubuntu"));
        assert_eq!(pools[1].node_selector.get(GPU_PRESENT_LABEL).map(String::as_str), Some("true"));
    }

    #[test]
    fn test_precompiled_pool_name() {
        let nodes = vec![gpu_node("a", "ubuntu", "22.04", "5.4.0-150-generic")];
        let pools = partition_nodes(&nodes, &base(), true, false);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name, "ubuntu22.04-5.4.0-150-generic");
        assert_eq!(pools[0].kernel_version.as_deref(), Some("5.4.0-150-generic"));
        assert_eq!(
            pools[0].node_selector.get(KERNEL_VERSION_LABEL).map(String::as_str),
            Some("5.4.0-150-generic")
        );
    }

    #[test]
    fn test_precompiled_skips_node_without_kernel_label() {
        let mut no_kernel = gpu_node("a", "ubuntu", "22.04", "5.15.0-91-generic");
        no_kernel.metadata.labels.get_or_insert_with(BTreeMap::new).remove(KERNEL_VERSION_LABEL);
        let labeled = gpu_node("b", "ubuntu", "22.04", "5.4.0-150-generic");
        let nodes = vec![no_kernel, labeled];

        let pools = partition_nodes(&nodes, &base(), true, false);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name, "ubuntu22.04-5.4.0-150-generic");

        // the kernel label only matters for precompiled drivers
        let pools = partition_nodes(&nodes, &base(), false, false);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name, "ubuntu22.04");
    }

    #[test]
    fn test_precompiled_splits_kernels() {
        let nodes = vec![
            gpu_node("a", "ubuntu", "22.04", "5.15.0-91-generic"),
            gpu_node("b", "ubuntu", "22.04", "5.15.0-92-generic"),
            gpu_node("c", "ubuntu", "22.04", "5.15.0-92-generic"),
        ];
        let pools = partition_nodes(&nodes, &base(), true, false);
        assert_eq!(pools.len(), 2);
    }

    #[test]
    fn test_immutable_os_uses_rhcos_version() {
        let mut node = gpu_node("a", "rhcos", "4.14", "5.14.0-284.40.1.el9_2.x86_64");
        node.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(RHCOS_VERSION_LABEL.to_string(), "414.92.202310170514-0".to_string());
        let pools = partition_nodes(&[node], &base(), false, true);
        assert_eq!(pools[0].name, "414.92.202310170514-0");
        assert_eq!(pools[0].rhcos_version.as_deref(), Some("414.92.202310170514-0"));

        // precompiled wins over the RHCOS grouping
        let node = gpu_node("b", "rhcos", "4.14", "5.14.0-284.40.1.el9_2.x86_64");
        let pools = partition_nodes(&[node], &base(), true, true);
        assert_eq!(pools[0].name, "rhcos4.14-5.14.0-284.40.1.el9.2");
        assert!(pools[0].rhcos_version.is_none());
    }

    #[test]
    fn test_nodes_missing_labels_are_skipped() {
        let mut unlabeled = gpu_node("a", "ubuntu", "22.04", "5.15.0-91-generic");
        unlabeled.metadata.labels.get_or_insert_with(BTreeMap::new).remove(OS_VERSION_LABEL);
        let good = gpu_node("b", "ubuntu", "20.04", "5.4.0-150-generic");
        let pools = partition_nodes(&[unlabeled, good], &base(), false, false);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name, "ubuntu20.04");

        // immutable OS without the OSTREE label yields nothing
        let rhcos = gpu_node("c", "rhcos", "4.14", "5.14.0");
        assert!(partition_nodes(&[rhcos], &base(), false, true).is_empty());
    }

    #[test]
    fn test_selector_and_gpu_label_filter() {
        let mut selector = base();
        selector.insert("pool".to_string(), "a100".to_string());

        let mut selected = gpu_node("a", "ubuntu", "22.04", "5.15.0-91-generic");
        selected.metadata.labels.get_or_insert_with(BTreeMap::new).insert("pool".into(), "a100".into());
        let unselected = gpu_node("b", "rhel", "9.2", "5.14.0");
        let mut no_gpu = gpu_node("c", "sles", "15.5", "5.14.21");
        no_gpu.metadata.labels.get_or_insert_with(BTreeMap::new).insert(GPU_PRESENT_LABEL.into(), "false".into());

        let pools = partition_nodes(&[selected, unselected, no_gpu], &selector, false, false);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].node_selector.get("pool").map(String::as_str), Some("a100"));
    }

    #[test]
    fn test_pools_are_disjoint() {
        let nodes = vec![
            gpu_node("a", "ubuntu", "22.04", "5.15.0-91-generic"),
            gpu_node("b", "ubuntu", "20.04", "5.4.0-150-generic"),
            gpu_node("c", "rhel", "9.2", "5.14.0-284.30.1.el9_2.x86_64"),
            gpu_node("d", "rhel", "8.8", "4.18.0-477.el8.x86_64"),
            gpu_node("e", "ubuntu", "22.04", "5.15.0-92-generic"),
        ];
        for precompiled in [false, true] {
            let pools = partition_nodes(&nodes, &base(), precompiled, false);
            for node in &nodes {
                let labels = node.metadata.labels.clone().unwrap_or_default();
                let matching = pools
                    .iter()
                    .filter(|pool| pool.node_selector.iter().all(|(k, v)| labels.get(k) == Some(v)))
                    .count();
                assert_eq!(matching, 1, "node must match exactly one pool");
            }
            let names: BTreeSet<_> = pools.iter().map(|p| p.name.clone()).collect();
            assert_eq!(names.len(), pools.len());
        }
    }

    #[test]
    fn test_no_nodes_no_pools() {
        assert!(partition_nodes(&[], &base(), false, false).is_empty());
    }
}
