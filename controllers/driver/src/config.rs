//! Controller configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ControllerError;

pub const DEFAULT_MANIFESTS_DIR: &str = "/opt/nvidia-driver-controller/manifests/state-driver";
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_REQUEUE_DELAY_SECS: u64 = 5;
pub const DEFAULT_CONCURRENCY: u16 = 3;
pub const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8081";

/// Runtime configuration for the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the driver objects are deployed into
    pub operator_namespace: String,
    /// Driver manager image used when the NVIDIADriver does not set one
    pub driver_manager_image: Option<String>,
    /// Directory holding the driver manifest templates
    pub manifests_dir: PathBuf,
    /// Upper bound on a single reconciliation pass
    pub reconcile_timeout: Duration,
    /// Delay before retrying a pass that did not converge
    pub requeue_delay: Duration,
    /// Maximum number of NVIDIADrivers reconciled concurrently
    pub concurrency: u16,
    /// Listen address of the probe / metrics server
    pub probe_addr: SocketAddr,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let operator_namespace = get("OPERATOR_NAMESPACE").ok_or_else(|| {
            ControllerError::InvalidConfig(
                "OPERATOR_NAMESPACE environment variable is required".to_string(),
            )
        })?;

        let probe_addr = get("PROBE_ADDR").unwrap_or_else(|| DEFAULT_PROBE_ADDR.to_string());
        let probe_addr = probe_addr.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("PROBE_ADDR '{probe_addr}' is invalid: {e}"))
        })?;

        let concurrency = parse_number(get("RECONCILE_CONCURRENCY"), "RECONCILE_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            operator_namespace,
            driver_manager_image: get("DRIVER_MANAGER_IMAGE"),
            manifests_dir: get("MANIFESTS_DIR")
                .map_or_else(|| PathBuf::from(DEFAULT_MANIFESTS_DIR), PathBuf::from),
            reconcile_timeout: Duration::from_secs(parse_number(
                get("RECONCILE_TIMEOUT_SECS"),
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            )?),
            requeue_delay: Duration::from_secs(parse_number(
                get("REQUEUE_DELAY_SECS"),
                "REQUEUE_DELAY_SECS",
                DEFAULT_REQUEUE_DELAY_SECS,
            )?),
            concurrency,
            probe_addr,
        })
    }
}

fn parse_number<T>(value: Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            ControllerError::InvalidConfig(format!("{key} '{raw}' is not a valid number: {e}"))
        }),
    }
}
