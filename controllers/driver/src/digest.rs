//! Install-config digest.
//!
//! [`InstallConfig`] projects the fields that force a driver reinstall out of
//! a DaemonSet and [`object_hash_ignore_empty`] reduces the projection to a
//! stable FNV-1a digest, stored in [`LAST_APPLIED_HASH_ANNOTATION`]. The
//! stored digest tells a change of the default driver manager image apart
//! from a change of the install config.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::hash::Hasher;

use fnv::FnvHasher;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Container, Volume};
use serde::Serialize;
use serde_json::Value;

/// DaemonSet annotation carrying the install config digest
pub const LAST_APPLIED_HASH_ANNOTATION: &str = "nvidia.com/last-applied-hash";

// Container names of the driver DaemonSet
pub const DRIVER_CONTAINER: &str = "nvidia-driver-ctr";
pub const MANAGER_CONTAINER: &str = "k8s-driver-manager";
pub const PEERMEM_CONTAINER: &str = "nvidia-peermem-ctr";
pub const GDS_CONTAINER: &str = "nvidia-fs-ctr";
pub const GDRCOPY_CONTAINER: &str = "nvidia-gdrcopy-ctr";
pub const TOOLKIT_CONTAINER: &str = "openshift-driver-toolkit-ctr";

/// Volumes whose identity takes part in the digest
pub const KNOWN_VOLUMES: &[&str] = &[
    "run-nvidia",
    "var-log",
    "dev-log",
    "host-os-release",
    "host-root",
    "host-sys",
    "run-nvidia-validations",
    "run-nvidia-topologyd",
    "run-mellanox-drivers",
    "mlnx-ofed-usr-src",
    "shared-nvidia-driver-toolkit",
    "firmware-search-path",
    "repo-config",
    "cert-config",
    "kernel-module-config",
    "licensing-config",
    "vgpu-topology-config",
];

/// Environment variable as it takes part in the digest
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvConfig {
    pub name: String,
    pub value: Option<String>,
    /// `configmap:<name>/<key>` or `secret:<name>/<key>`
    pub value_from: Option<String>,
}

/// Volume mount of a digested container
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MountConfig {
    pub name: String,
    pub mount_path: String,
    pub sub_path: Option<String>,
    pub read_only: bool,
}

/// Container fields that force a reinstall
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerConfig {
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<EnvConfig>,
    pub volume_mounts: Vec<MountConfig>,
}

/// Source of one of the [`KNOWN_VOLUMES`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumeConfig {
    pub name: String,
    pub host_path: Option<String>,
    pub config_map: Option<String>,
    pub secret: Option<String>,
}

/// Driver features switched on for the pool
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureToggles {
    pub open_kernel_modules: bool,
    pub gds_enabled: bool,
    pub gdrcopy_enabled: bool,
    pub rdma_enabled: bool,
    pub use_host_mofed: bool,
    pub driver_toolkit: bool,
}

/// Fields of a driver DaemonSet that force a reinstall when changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstallConfig {
    pub driver: Option<ContainerConfig>,
    pub driver_manager: Option<ContainerConfig>,
    pub peer_memory: Option<ContainerConfig>,
    pub gds: Option<ContainerConfig>,
    pub gdrcopy: Option<ContainerConfig>,
    pub toolkit: Option<ContainerConfig>,
    pub volumes: Vec<VolumeConfig>,
    pub referenced_configs: Vec<String>,
    pub host_root: Option<String>,
    #[serde(flatten)]
    pub features: FeatureToggles,
}

fn key_ref(source: &Value, field: &str, kind: &str) -> Option<String> {
    let selector = source.get(field)?;
    let name = selector.get("name").and_then(Value::as_str).unwrap_or_default();
    let key = selector.get("key").and_then(Value::as_str).unwrap_or_default();
    Some(format!("{kind}:{name}/{key}"))
}

fn env_config(container: &Container) -> Vec<EnvConfig> {
    let mut env: Vec<EnvConfig> = container
        .env
        .iter()
        .flatten()
        .filter_map(|var| {
            let value_from = match &var.value_from {
                None => None,
                Some(source) => {
                    let source = serde_json::to_value(source).ok()?;
                    // downward API values differ per pod and never force a reinstall
                    Some(
                        key_ref(&source, "configMapKeyRef", "configmap")
                            .or_else(|| key_ref(&source, "secretKeyRef", "secret"))?,
                    )
                }
            };
            Some(EnvConfig {
                name: var.name.clone(),
                value: var.value.clone(),
                value_from,
            })
        })
        .collect();
    env.sort_by(|a, b| a.name.cmp(&b.name));
    env
}

fn container_config(container: &Container) -> ContainerConfig {
    let mut volume_mounts: Vec<MountConfig> = container
        .volume_mounts
        .iter()
        .flatten()
        .filter(|mount| KNOWN_VOLUMES.contains(&mount.name.as_str()))
        .map(|mount| MountConfig {
            name: mount.name.clone(),
            mount_path: mount.mount_path.clone(),
            sub_path: mount.sub_path.clone(),
            read_only: mount.read_only.unwrap_or(false),
        })
        .collect();
    volume_mounts.sort_by(|a, b| (&a.name, &a.mount_path).cmp(&(&b.name, &b.mount_path)));

    ContainerConfig {
        image: container.image.clone().unwrap_or_default(),
        command: container.command.clone().unwrap_or_default(),
        args: container.args.clone().unwrap_or_default(),
        env: env_config(container),
        volume_mounts,
    }
}

fn volume_config(volume: &Volume) -> VolumeConfig {
    let source = serde_json::to_value(volume).unwrap_or_default();
    let text = |pointer: &str| source.pointer(pointer).and_then(Value::as_str).map(str::to_string);
    VolumeConfig {
        name: volume.name.clone(),
        host_path: text("/hostPath/path"),
        config_map: text("/configMap/name"),
        secret: text("/secret/secretName"),
    }
}

fn env_is(config: Option<&ContainerConfig>, name: &str, expected: &str) -> bool {
    config
        .and_then(|c| c.env.iter().find(|e| e.name == name))
        .and_then(|e| e.value.as_deref())
        .is_some_and(|value| value.eq_ignore_ascii_case(expected))
}

impl InstallConfig {
    /// Project the reinstall-relevant fields out of a driver DaemonSet
    pub fn from_daemonset(daemonset: &DaemonSet) -> Self {
        let mut config = InstallConfig::default();
        let Some(pod) = daemonset
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
        else {
            return config;
        };

        for container in pod.init_containers.iter().flatten().chain(pod.containers.iter()) {
            let slot = match container.name.as_str() {
                DRIVER_CONTAINER => &mut config.driver,
                MANAGER_CONTAINER => &mut config.driver_manager,
                PEERMEM_CONTAINER => &mut config.peer_memory,
                GDS_CONTAINER => &mut config.gds,
                GDRCOPY_CONTAINER => &mut config.gdrcopy,
                TOOLKIT_CONTAINER => &mut config.toolkit,
                _ => continue,
            };
            *slot = Some(container_config(container));
        }

        let mut referenced = BTreeSet::new();
        for volume in pod.volumes.iter().flatten() {
            let volume = volume_config(volume);
            if let Some(name) = &volume.config_map {
                referenced.insert(format!("configmap:{name}"));
            }
            if let Some(name) = &volume.secret {
                referenced.insert(format!("secret:{name}"));
            }
            if volume.name == "host-root" {
                config.host_root.clone_from(&volume.host_path);
            }
            if KNOWN_VOLUMES.contains(&volume.name.as_str()) {
                config.volumes.push(volume);
            }
        }
        config.volumes.sort_by(|a, b| a.name.cmp(&b.name));

        let containers = [
            &config.driver,
            &config.driver_manager,
            &config.peer_memory,
            &config.gds,
            &config.gdrcopy,
            &config.toolkit,
        ];
        for container in containers.into_iter().flatten() {
            for env in &container.env {
                if let Some(source) = &env.value_from {
                    if let Some((object, _key)) = source.rsplit_once('/') {
                        referenced.insert(object.to_string());
                    }
                }
            }
        }
        config.referenced_configs = referenced.into_iter().collect();

        config.features = FeatureToggles {
            open_kernel_modules: env_is(config.driver.as_ref(), "KERNEL_MODULE_TYPE", "open"),
            gds_enabled: config.gds.is_some(),
            gdrcopy_enabled: config.gdrcopy.is_some(),
            rdma_enabled: config.peer_memory.is_some(),
            use_host_mofed: env_is(config.peer_memory.as_ref(), "USE_HOST_MOFED", "true"),
            driver_toolkit: config.toolkit.is_some(),
        };
        config
    }
}

/// Digest of the install config of a DaemonSet
pub fn daemonset_hash(daemonset: &DaemonSet) -> Result<String, serde_json::Error> {
    object_hash_ignore_empty(&InstallConfig::from_daemonset(daemonset))
}

/// Digest over every serialized field
pub fn object_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = canonicalize(serde_json::to_value(value)?, false).unwrap_or(Value::Null);
    Ok(fnv_hex(&value))
}

/// Digest that treats zero values as absent: null, `""`, `false`, `0`, `[]`
/// and `{}` never contribute, so adding an unset field keeps the digest.
pub fn object_hash_ignore_empty<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = canonicalize(serde_json::to_value(value)?, true).unwrap_or(Value::Null);
    Ok(fnv_hex(&value))
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn canonicalize(value: Value, drop_empty: bool) -> Option<Value> {
    let value = match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| canonicalize(v, drop_empty).map(|v| (k, v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| canonicalize(v, drop_empty).unwrap_or(Value::Null))
                .collect(),
        ),
        other => other,
    };
    if drop_empty && is_zero(&value) {
        None
    } else {
        Some(value)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn fnv_hex(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let mut hasher = FnvHasher::default();
    hasher.write(canonical.as_bytes());
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
#[path = "digest_test.rs"]
mod digest_test;
