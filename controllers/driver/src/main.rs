//! NVIDIA Driver Controller
//!
//! Reconciles NVIDIADriver resources into one driver DaemonSet per node pool
//! (nodes sharing OS release, OS version and, for precompiled drivers, kernel
//! version), together with the RBAC objects the driver pods need.

mod apply;
mod backoff;
mod cluster_info;
mod config;
mod controller;
mod deadline;
mod digest;
mod error;
mod image;
mod kinds;
mod metrics;
mod naming;
mod nodepool;
mod probes;
mod reconciler;
mod render;
mod state;
mod validation;
mod watcher;

#[cfg(test)]
mod test_utils;

use controller::Controller;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ControllerConfig;
use crate::error::ControllerError;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        return Err(ControllerError::InvalidConfig(format!(
            "failed to install rustls crypto provider: {e:?}"
        )));
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting NVIDIA Driver Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Operator namespace: {}", config.operator_namespace);
    info!("  Manifests: {}", config.manifests_dir.display());
    info!(
        "  Driver manager image: {}",
        config.driver_manager_image.as_deref().unwrap_or("(must be set per NVIDIADriver)")
    );
    info!("  Reconcile timeout: {:?}", config.reconcile_timeout);
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
