//! Node selector conflict detection across NVIDIADrivers.
//!
//! Two NVIDIADrivers must never select the same GPU node, otherwise two
//! driver DaemonSets would fight over it.

use std::collections::BTreeMap;

use crds::NVIDIADriver;
use k8s_openapi::api::core::v1::Node;
use object_store::{format_selector, ObjectStore};

use crate::deadline::Deadline;
use crate::error::ControllerError;
use crate::nodepool::{driver_node_selector, GPU_PRESENT_LABEL};

fn selects(selector: &BTreeMap<String, String>, node: &Node) -> bool {
    let labels = node.metadata.labels.as_ref();
    selector
        .iter()
        .all(|(key, value)| labels.and_then(|labels| labels.get(key)) == Some(value))
}

/// First `(other driver, node)` pair where another live NVIDIADriver selects
/// a node also selected by `driver`
pub fn find_conflict(nodes: &[Node], driver: &NVIDIADriver, others: &[NVIDIADriver]) -> Option<(String, String)> {
    let own_name = driver.metadata.name.as_deref();
    let own_selector = driver_node_selector(&driver.spec.node_selector);

    for other in others {
        if other.metadata.name.as_deref() == own_name || other.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let other_selector = driver_node_selector(&other.spec.node_selector);
        let shared = nodes
            .iter()
            .find(|node| selects(&own_selector, node) && selects(&other_selector, node));
        if let Some(node) = shared {
            return Some((
                other.metadata.name.clone().unwrap_or_default(),
                node.metadata.name.clone().unwrap_or_default(),
            ));
        }
    }
    None
}

/// Fail with `NodeSelectorConflict` when another of `drivers` selects one of
/// this driver's GPU nodes
pub async fn check_node_selector_conflicts(
    store: &dyn ObjectStore,
    deadline: &Deadline,
    driver: &NVIDIADriver,
    drivers: &[NVIDIADriver],
) -> Result<(), ControllerError> {
    if drivers.len() < 2 {
        return Ok(());
    }
    let gpu_selector = BTreeMap::from([(GPU_PRESENT_LABEL.to_string(), "true".to_string())]);
    let nodes = deadline.run(store.list_nodes(&format_selector(&gpu_selector))).await?;

    match find_conflict(&nodes, driver, drivers) {
        Some((other, node)) => Err(ControllerError::NodeSelectorConflict(format!(
            "node {node} is also selected by NVIDIADriver {other}"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{driver_spec, gpu_node, make_driver, mark_deleting, with_label};
    use crds::NVIDIADriverSpec;
    use object_store::MockObjectStore;
    use std::time::Duration;

    fn driver_selecting(name: &str, selector: &[(&str, &str)]) -> NVIDIADriver {
        let spec = NVIDIADriverSpec {
            node_selector: selector.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..driver_spec()
        };
        make_driver(name, spec)
    }

    fn nodes() -> Vec<Node> {
        vec![
            with_label(gpu_node("a100", "ubuntu", "22.04", "5.15.0"), "gpu-type", "a100"),
            with_label(gpu_node("h100", "ubuntu", "22.04", "5.15.0"), "gpu-type", "h100"),
        ]
    }

    #[test]
    fn test_disjoint_selectors() {
        let a = driver_selecting("a", &[("gpu-type", "a100")]);
        let h = driver_selecting("h", &[("gpu-type", "h100")]);
        assert_eq!(find_conflict(&nodes(), &a, &[a.clone(), h]), None);
    }

    #[test]
    fn test_overlapping_selectors() {
        let all = driver_selecting("all", &[]);
        let h = driver_selecting("h", &[("gpu-type", "h100")]);
        assert_eq!(
            find_conflict(&nodes(), &h, &[all.clone(), h.clone()]),
            Some(("all".to_string(), "h100".to_string()))
        );
    }

    #[test]
    fn test_deleting_driver_is_ignored() {
        let all = mark_deleting(driver_selecting("all", &[]));
        assert!(all.metadata.deletion_timestamp.is_some());
        let h = driver_selecting("h", &[("gpu-type", "h100")]);
        assert_eq!(find_conflict(&nodes(), &h, &[all, h.clone()]), None);
    }

    #[tokio::test]
    async fn test_conflict_reported_from_store() {
        let store = MockObjectStore::new();
        for node in nodes() {
            store.add_node(node);
        }
        let all = driver_selecting("all", &[]);
        let h = driver_selecting("h", &[("gpu-type", "h100")]);
        let drivers = vec![all, h.clone()];

        let err = check_node_selector_conflicts(&store, &Deadline::after(Duration::from_secs(5)), &h, &drivers)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NodeSelectorConflict(_)));
    }
}
