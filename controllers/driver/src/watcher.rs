//! Kubernetes resource watchers.
//!
//! NVIDIADrivers are reconciled through `kube_runtime::Controller`. Owned
//! driver DaemonSets trigger their NVIDIADriver, and any change to a GPU node
//! triggers every NVIDIADriver since node pools may have changed.

use std::sync::Arc;

use crds::NVIDIADriver;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::nodepool::GPU_PRESENT_LABEL;
use crate::reconciler::Reconciler;
use crate::render::data::{COMPONENT_LABEL, COMPONENT_VALUE};

/// Label selector of the DaemonSets the controller owns
pub fn owned_daemonset_selector() -> String {
    format!("{COMPONENT_LABEL}={COMPONENT_VALUE}")
}

/// Label selector of the nodes that can host a driver
pub fn gpu_node_selector() -> String {
    format!("{GPU_PRESENT_LABEL}=true")
}

/// Every known NVIDIADriver, for node events
pub fn all_drivers(drivers: &[Arc<NVIDIADriver>]) -> Vec<ObjectRef<NVIDIADriver>> {
    drivers.iter().map(|driver| ObjectRef::from_obj(driver.as_ref())).collect()
}

async fn reconcile(driver: Arc<NVIDIADriver>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    debug!(driver = ?driver.metadata.name, "Reconciling NVIDIADriver");
    ctx.reconcile_driver(&driver).await
}

fn error_policy(driver: Arc<NVIDIADriver>, error: &ControllerError, ctx: Arc<Reconciler>) -> Action {
    warn!(driver = ?driver.metadata.name, error = %error, "Reconciliation failed, requeueing");
    Action::requeue(ctx.config().requeue_delay)
}

/// Watch NVIDIADrivers, their DaemonSets and GPU nodes until shutdown
pub async fn watch_drivers(client: Client, reconciler: Arc<Reconciler>) -> Result<(), ControllerError> {
    let config = reconciler.config();
    let drivers: Api<NVIDIADriver> = Api::all(client.clone());
    let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), &config.operator_namespace);
    let nodes: Api<Node> = Api::all(client);

    // Debounce batches the DaemonSet status updates of a rollout
    let runtime_config = RuntimeConfig::default()
        .debounce(config.requeue_delay / 5)
        .concurrency(config.concurrency);

    info!(
        namespace = %config.operator_namespace,
        concurrency = config.concurrency,
        "Starting NVIDIADriver watcher"
    );

    let controller = Controller::new(drivers, watcher::Config::default());
    let store = controller.store();
    controller
        .owns(daemonsets, watcher::Config::default().labels(&owned_daemonset_selector()))
        .watches(nodes, watcher::Config::default().labels(&gpu_node_selector()), move |node: Node| {
            debug!(node = ?node.metadata.name, "GPU node changed");
            all_drivers(&store.state())
        })
        .with_config(runtime_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::clone(&reconciler))
        .for_each(|res| async move {
            match res {
                Ok((driver, _)) => debug!(driver = %driver.name, "Reconciled"),
                Err(e) => error!(error = %e, "NVIDIADriver controller error"),
            }
        })
        .await;

    info!("NVIDIADriver watcher stopped");
    Ok(())
}
