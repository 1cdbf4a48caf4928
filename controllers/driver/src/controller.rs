//! Main controller implementation.
//!
//! The `Controller` owns two long running tasks: the NVIDIADriver watcher
//! and the probe / metrics server. It exits as soon as either one stops.

use std::sync::Arc;

use kube::Client;
use object_store::{KubeObjectStore, ObjectStore};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::Reconciler;
use crate::render::Renderer;
use crate::watcher::watch_drivers;

/// Main controller for NVIDIADriver reconciliation.
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
    probe_state: ProbeState,
}

impl Controller {
    /// Connect to the cluster and start the watcher and probe tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing NVIDIA driver controller");

        let client = Client::try_default().await?;
        let metrics = Metrics::new()
            .map_err(|e| ControllerError::InvalidConfig(format!("Failed to register metrics: {e}")))?;

        let templates = Renderer::new(&config.manifests_dir).template_files()?;
        info!(dir = %config.manifests_dir.display(), templates = templates.len(), "Loaded driver manifests");

        let store: Arc<dyn ObjectStore> = Arc::new(KubeObjectStore::new(client.clone()));
        let probe_state = ProbeState::new(metrics.clone());
        let reconciler = Arc::new(Reconciler::new(store, config.clone(), metrics));

        let probe_server = tokio::spawn(probes::serve(config.probe_addr, probe_state.clone()));
        let watcher = tokio::spawn(watch_drivers(client, reconciler));

        Ok(Self {
            watcher,
            probe_server,
            probe_state,
        })
    }

    /// Run until the watcher or the probe server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        self.probe_state.set_ready(true);
        info!("NVIDIA driver controller running");

        let result = tokio::select! {
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("NVIDIADriver watcher panicked: {e}")))?
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Probe(format!("Probe server panicked: {e}")))?
            }
        };

        self.probe_state.set_ready(false);
        self.watcher.abort();
        self.probe_server.abort();

        if let Err(e) = &result {
            error!(error = %e, "Controller task failed");
        } else {
            info!("NVIDIA driver controller stopped");
        }
        result
    }
}
