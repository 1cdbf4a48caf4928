//! Per-pool render data.
//!
//! [`assemble`] turns an NVIDIADriver, one node pool and the cluster facts
//! into the data the manifest templates are executed against. Optional
//! add-ons are `None` unless enabled so templates emit nothing for them.

use std::collections::BTreeMap;

use crds::{
    ContainerProbeSpec, DriverType, EnvVar, NVIDIADriver, NVIDIADriverSpec, ResourceRequirements, Toleration,
};
use k8s_openapi::api::core::v1::ConfigMap;
use object_store::ObjectStore;
use serde::Serialize;

use crate::cluster_info::ClusterFacts;
use crate::config::ControllerConfig;
use crate::deadline::Deadline;
use crate::error::ControllerError;
use crate::image::image_path;
use crate::naming;
use crate::nodepool::NodePool;

// Labels set on every rendered object
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const COMPONENT_VALUE: &str = "nvidia-driver";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "nvidia-driver-controller";
pub const DRIVER_TYPE_LABEL: &str = "nvidia.com/driver-type";

const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
const DEFAULT_PRIORITY_CLASS: &str = "system-node-critical";
const DEFAULT_HOST_ROOT: &str = "/";

const GRIDD_CONF: &str = "gridd.conf";
const NLS_TOKEN: &str = "client_configuration_token.tok";

/// Container probe timings after per-driver overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeData {
    pub initial_delay_seconds: i32,
    pub timeout_seconds: i32,
    pub period_seconds: i32,
    pub success_threshold: i32,
    pub failure_threshold: i32,
}

impl ProbeData {
    fn with_overrides(self, spec: Option<&ContainerProbeSpec>) -> Self {
        let Some(spec) = spec else {
            return self;
        };
        Self {
            initial_delay_seconds: spec.initial_delay_seconds.unwrap_or(self.initial_delay_seconds),
            timeout_seconds: spec.timeout_seconds.unwrap_or(self.timeout_seconds),
            period_seconds: spec.period_seconds.unwrap_or(self.period_seconds),
            success_threshold: spec.success_threshold.unwrap_or(self.success_threshold),
            failure_threshold: spec.failure_threshold.unwrap_or(self.failure_threshold),
        }
    }
}

/// Driver container and DaemonSet settings for one pool
#[derive(Debug, Clone, Serialize)]
pub struct DriverData {
    /// Name of the owning NVIDIADriver
    pub cr_name: String,
    /// DaemonSet name
    pub name: String,
    /// `app` label value
    pub app_name: String,
    pub service_account_name: String,
    pub driver_type: String,
    pub image_path: String,
    pub image_pull_policy: String,
    pub image_pull_secrets: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub startup_probe: ProbeData,
    pub liveness_probe: ProbeData,
    pub readiness_probe: ProbeData,
    pub resources: Option<ResourceRequirements>,
    pub node_affinity: Option<serde_json::Value>,
    pub tolerations: Vec<Toleration>,
    /// DaemonSet labels
    pub labels: BTreeMap<String, String>,
    /// User labels with the reserved keys removed
    pub pod_labels: BTreeMap<String, String>,
    pub pod_annotations: BTreeMap<String, String>,
    pub priority_class_name: String,
    pub host_root: String,
    pub use_precompiled: bool,
    pub use_open_kernel_modules: bool,
}

/// Driver manager init container
#[derive(Debug, Clone, Serialize)]
pub struct ManagerData {
    pub image_path: String,
    pub image_pull_policy: String,
    pub env: Vec<EnvVar>,
}

/// Sidecar container of an enabled add-on driver (GDS, GDRCopy)
#[derive(Debug, Clone, Serialize)]
pub struct AddonData {
    pub image_path: String,
    pub image_pull_policy: String,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
}

/// GPUDirect RDMA settings, present only when enabled
#[derive(Debug, Clone, Serialize)]
pub struct RdmaData {
    pub use_host_mofed: Option<bool>,
}

/// OpenShift driver-toolkit sidecar
#[derive(Debug, Clone, Serialize)]
pub struct ToolkitData {
    pub image_path: String,
}

/// Cluster facts the templates need
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeData {
    pub namespace: String,
    pub kubernetes_version: String,
    pub openshift_version: Option<String>,
}

/// core/v1 KeyToPath
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyToPath {
    pub key: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapSource {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    pub secret_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

/// core/v1 Volume restricted to ConfigMap and Secret sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretSource>,
}

/// core/v1 VolumeMount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountData {
    pub name: String,
    pub mount_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    pub read_only: bool,
}

/// Volumes and mounts contributed by referenced configuration objects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdditionalConfigs {
    pub volumes: Vec<VolumeData>,
    pub volume_mounts: Vec<MountData>,
}

/// Everything the driver manifests render from, for one pool
#[derive(Debug, Clone, Serialize)]
pub struct DriverRenderData {
    pub driver: DriverData,
    pub manager: ManagerData,
    pub gds: Option<AddonData>,
    pub gdrcopy: Option<AddonData>,
    pub rdma: Option<RdmaData>,
    pub toolkit: Option<ToolkitData>,
    pub pool: NodePool,
    pub runtime: RuntimeData,
    pub additional_configs: AdditionalConfigs,
}

/// File keys of a referenced ConfigMap, sorted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFiles {
    pub name: String,
    pub keys: Vec<String>,
}

/// Object holding the vGPU licensing files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicensingSource {
    Secret(String),
    ConfigMap(String),
}

/// Resolved licensing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensingFiles {
    pub source: LicensingSource,
    pub nls_enabled: bool,
}

/// Configuration objects referenced by an NVIDIADriver, resolved once per pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencedConfigs {
    pub repo: Option<ConfigFiles>,
    pub certs: Option<ConfigFiles>,
    pub kernel_modules: Option<ConfigFiles>,
    pub licensing: Option<LicensingFiles>,
    pub vgpu_topology: Option<ConfigFiles>,
}

fn config_map_keys(config_map: &ConfigMap) -> Vec<String> {
    let mut keys: Vec<String> = config_map
        .data
        .iter()
        .flat_map(|data| data.keys().cloned())
        .chain(config_map.binary_data.iter().flat_map(|data| data.keys().cloned()))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

async fn fetch_config_files(
    store: &dyn ObjectStore,
    deadline: &Deadline,
    namespace: &str,
    name: &str,
    purpose: &str,
) -> Result<ConfigFiles, ControllerError> {
    let config_map = deadline
        .run(store.get_config_map(namespace, name))
        .await?
        .ok_or_else(|| ControllerError::MissingConfig(format!("{purpose} ConfigMap {namespace}/{name}")))?;
    Ok(ConfigFiles {
        name: name.to_string(),
        keys: config_map_keys(&config_map),
    })
}

impl ReferencedConfigs {
    pub async fn fetch(
        store: &dyn ObjectStore,
        deadline: &Deadline,
        namespace: &str,
        spec: &NVIDIADriverSpec,
    ) -> Result<Self, ControllerError> {
        let mut configs = ReferencedConfigs::default();

        if let Some(repo) = &spec.repo_config {
            configs.repo = Some(fetch_config_files(store, deadline, namespace, &repo.name, "repository").await?);
        }
        if let Some(certs) = &spec.cert_config {
            configs.certs = Some(fetch_config_files(store, deadline, namespace, &certs.name, "certificate").await?);
        }
        if let Some(modules) = &spec.kernel_module_config {
            configs.kernel_modules =
                Some(fetch_config_files(store, deadline, namespace, &modules.name, "kernel module").await?);
        }
        if spec.driver_type.is_vgpu() {
            if let Some(topology) = &spec.virtual_topology_config {
                configs.vgpu_topology =
                    Some(fetch_config_files(store, deadline, namespace, &topology.name, "vGPU topology").await?);
            }
        }
        if let Some(licensing) = &spec.licensing_config {
            let nls_enabled = licensing.nls_enabled.unwrap_or(false);
            let mut required = vec![GRIDD_CONF];
            if nls_enabled {
                required.push(NLS_TOKEN);
            }
            let (source, keys) = match (&licensing.secret_name, &licensing.config_map_name) {
                (Some(secret), _) => {
                    let found = deadline
                        .run(store.get_secret(namespace, secret))
                        .await?
                        .ok_or_else(|| ControllerError::MissingConfig(format!("licensing Secret {namespace}/{secret}")))?;
                    let keys: Vec<String> = found
                        .data
                        .iter()
                        .flat_map(|data| data.keys().cloned())
                        .chain(found.string_data.iter().flat_map(|data| data.keys().cloned()))
                        .collect();
                    (LicensingSource::Secret(secret.clone()), keys)
                }
                (None, Some(config_map)) => {
                    let files = fetch_config_files(store, deadline, namespace, config_map, "licensing").await?;
                    (LicensingSource::ConfigMap(config_map.clone()), files.keys)
                }
                (None, None) => {
                    return Err(ControllerError::InvalidSpec(
                        "licensingConfig needs secretName or configMapName".to_string(),
                    ));
                }
            };
            if let Some(missing) = required.iter().find(|key| !keys.iter().any(|k| k == *key)) {
                return Err(ControllerError::MissingConfig(format!("licensing configuration has no '{missing}' key")));
            }
            configs.licensing = Some(LicensingFiles { source, nls_enabled });
        }
        Ok(configs)
    }
}

fn repo_config_dir(os_release: &str) -> Option<&'static str> {
    match os_release {
        "ubuntu" | "debian" => Some("/etc/apt/sources.list.d"),
        "rhel" | "rhcos" | "centos" | "rocky" | "ol" | "amzn" => Some("/etc/yum.repos.d"),
        "sles" | "sl-micro" => Some("/etc/zypp/repos.d"),
        _ => None,
    }
}

fn cert_config_dir(os_release: &str) -> Option<&'static str> {
    match os_release {
        "ubuntu" | "debian" => Some("/usr/local/share/ca-certificates"),
        "rhel" | "rhcos" | "centos" | "rocky" | "ol" | "amzn" => Some("/etc/pki/ca-trust/extracted/pem"),
        "sles" | "sl-micro" => Some("/etc/pki/trust/anchors"),
        _ => None,
    }
}

fn config_map_volume(name: &str, files: &ConfigFiles) -> VolumeData {
    VolumeData {
        name: name.to_string(),
        config_map: Some(ConfigMapSource {
            name: files.name.clone(),
            items: files
                .keys
                .iter()
                .map(|key| KeyToPath { key: key.clone(), path: key.clone() })
                .collect(),
        }),
        secret: None,
    }
}

fn file_mounts(volume: &str, dir: &str, keys: &[String]) -> Vec<MountData> {
    keys.iter()
        .map(|key| MountData {
            name: volume.to_string(),
            mount_path: format!("{}/{key}", dir.trim_end_matches('/')),
            sub_path: Some(key.clone()),
            read_only: true,
        })
        .collect()
}

/// Volumes and mounts for the referenced configs, for one pool's OS
pub fn additional_configs(configs: &ReferencedConfigs, pool: &NodePool) -> Result<AdditionalConfigs, ControllerError> {
    let mut additional = AdditionalConfigs::default();

    if let Some(repo) = &configs.repo {
        let dir = repo_config_dir(&pool.os_release).ok_or_else(|| {
            ControllerError::InvalidSpec(format!("repository configuration is not supported on {}", pool.os_release))
        })?;
        additional.volumes.push(config_map_volume("repo-config", repo));
        additional.volume_mounts.extend(file_mounts("repo-config", dir, &repo.keys));
    }

    if let Some(certs) = &configs.certs {
        let dir = cert_config_dir(&pool.os_release).ok_or_else(|| {
            ControllerError::InvalidSpec(format!("certificate configuration is not supported on {}", pool.os_release))
        })?;
        additional.volumes.push(config_map_volume("cert-config", certs));
        additional.volume_mounts.extend(file_mounts("cert-config", dir, &certs.keys));
    }

    if let Some(modules) = &configs.kernel_modules {
        additional.volumes.push(config_map_volume("kernel-module-config", modules));
        additional.volume_mounts.extend(file_mounts("kernel-module-config", "/drivers", &modules.keys));
    }

    if let Some(licensing) = &configs.licensing {
        let mut items = vec![KeyToPath { key: GRIDD_CONF.to_string(), path: GRIDD_CONF.to_string() }];
        additional.volume_mounts.push(MountData {
            name: "licensing-config".to_string(),
            mount_path: format!("/drivers/{GRIDD_CONF}"),
            sub_path: Some(GRIDD_CONF.to_string()),
            read_only: true,
        });
        if licensing.nls_enabled {
            items.push(KeyToPath { key: NLS_TOKEN.to_string(), path: NLS_TOKEN.to_string() });
            additional.volume_mounts.push(MountData {
                name: "licensing-config".to_string(),
                mount_path: format!("/drivers/ClientConfigToken/{NLS_TOKEN}"),
                sub_path: Some(NLS_TOKEN.to_string()),
                read_only: true,
            });
        }
        let volume = match &licensing.source {
            LicensingSource::Secret(name) => VolumeData {
                name: "licensing-config".to_string(),
                config_map: None,
                secret: Some(SecretSource { secret_name: name.clone(), items }),
            },
            LicensingSource::ConfigMap(name) => VolumeData {
                name: "licensing-config".to_string(),
                config_map: Some(ConfigMapSource { name: name.clone(), items }),
                secret: None,
            },
        };
        additional.volumes.push(volume);
    }

    if let Some(topology) = &configs.vgpu_topology {
        additional.volumes.push(config_map_volume("vgpu-topology-config", topology));
        additional
            .volume_mounts
            .extend(file_mounts("vgpu-topology-config", "/etc/nvidia/vgpu-topology", &topology.keys));
    }

    Ok(additional)
}

fn is_reserved_key(key: &str) -> bool {
    key == "app" || key.starts_with("app.kubernetes.io/")
}

/// Drop `app` and `app.kubernetes.io/*` keys the controller owns
pub fn strip_reserved_keys(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .filter(|(key, _)| !is_reserved_key(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Merge `overrides` into `base` by name, keeping base order and appending new names
fn merge_env(mut base: Vec<EnvVar>, overrides: &[EnvVar]) -> Vec<EnvVar> {
    for var in overrides {
        match base.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => existing.value.clone_from(&var.value),
            None => base.push(var.clone()),
        }
    }
    base
}

fn pull_policy(policy: Option<&String>) -> String {
    policy.cloned().unwrap_or_else(|| DEFAULT_PULL_POLICY.to_string())
}

fn manager_data(spec: &NVIDIADriverSpec, config: &ControllerConfig) -> Result<ManagerData, ControllerError> {
    let manager = spec.manager.clone().unwrap_or_default();
    let image_path = if manager.image.is_empty() {
        config.driver_manager_image.clone().ok_or_else(|| {
            ControllerError::InvalidImage(
                "driver manager image is not set in the NVIDIADriver nor in DRIVER_MANAGER_IMAGE".to_string(),
            )
        })?
    } else {
        image_path(&manager.repository, &manager.image, &manager.version, &[])?
    };

    let defaults = vec![
        EnvVar::new("ENABLE_GPU_POD_EVICTION", "true"),
        EnvVar::new("ENABLE_AUTO_DRAIN", "false"),
        EnvVar::new("DRAIN_USE_FORCE", "false"),
        EnvVar::new("DRAIN_POD_SELECTOR_LABEL", ""),
        EnvVar::new("DRAIN_TIMEOUT_SECONDS", "0s"),
        EnvVar::new("DRAIN_DELETE_EMPTYDIR_DATA", "false"),
    ];
    Ok(ManagerData {
        image_path,
        image_pull_policy: pull_policy(manager.image_pull_policy.as_ref()),
        env: merge_env(defaults, &manager.env),
    })
}

fn addon_data(
    name: &str,
    addon: &crds::AddonDriverSpec,
    pool: &NodePool,
) -> Result<AddonData, ControllerError> {
    let os_tag = pool.os_tag();
    let image_path = image_path(&addon.repository, &addon.image, &addon.version, &[&os_tag])
        .map_err(|e| ControllerError::InvalidImage(format!("{name}: {e}")))?;
    Ok(AddonData {
        image_path,
        image_pull_policy: pull_policy(addon.image_pull_policy.as_ref()),
        args: addon.args.clone(),
        env: addon.env.clone(),
    })
}

/// Inputs shared by every pool of one pass
#[derive(Debug, Clone, Copy)]
pub struct AssembleContext<'a> {
    pub driver: &'a NVIDIADriver,
    pub facts: &'a ClusterFacts,
    pub config: &'a ControllerConfig,
    pub configs: &'a ReferencedConfigs,
}

/// Build the render data for one pool
pub fn assemble(ctx: &AssembleContext<'_>, pool: &NodePool) -> Result<DriverRenderData, ControllerError> {
    let spec = &ctx.driver.spec;
    let cr_name = ctx
        .driver
        .metadata
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidSpec("NVIDIADriver has no name".to_string()))?;

    let os_tag = pool.os_tag();
    let kernel = if spec.use_precompiled {
        Some(pool.sanitized_kernel_version().ok_or_else(|| {
            ControllerError::InvalidSpec(format!("precompiled driver needs a kernel version for pool {}", pool.name))
        })?)
    } else {
        None
    };
    let suffixes: Vec<&str> = kernel.iter().map(String::as_str).chain([os_tag.as_str()]).collect();
    let driver_image = image_path(&spec.repository, &spec.image, &spec.version, &suffixes)?;

    let manager = manager_data(spec, ctx.config)?;
    let gds = match &spec.gds {
        Some(gds) if gds.enabled => Some(addon_data("gds", gds, pool)?),
        _ => None,
    };
    let gdrcopy = match &spec.gdrcopy {
        Some(gdrcopy) if gdrcopy.enabled => Some(addon_data("gdrcopy", gdrcopy, pool)?),
        _ => None,
    };
    let rdma = spec
        .rdma
        .as_ref()
        .filter(|rdma| rdma.enabled)
        .map(|rdma| RdmaData { use_host_mofed: rdma.use_host_mofed });

    let toolkit = match (&pool.rhcos_version, ctx.facts.is_openshift() && !spec.use_precompiled) {
        (Some(rhcos), true) => {
            let image = ctx.facts.toolkit_image(rhcos).ok_or_else(|| {
                ControllerError::MissingConfig(format!("driver-toolkit image for RHCOS {rhcos}"))
            })?;
            Some(ToolkitData { image_path: image.to_string() })
        }
        _ => None,
    };

    let mut env = Vec::new();
    if spec.driver_type == DriverType::Gpu {
        let module_type = if spec.use_open_kernel_modules { "open" } else { "proprietary" };
        env.push(EnvVar::new("KERNEL_MODULE_TYPE", module_type));
    }
    if spec.use_precompiled {
        env.push(EnvVar::new("USE_PRECOMPILED", "true"));
    }
    if rdma.is_some() {
        env.push(EnvVar::new("GPU_DIRECT_RDMA_ENABLED", "true"));
    }
    if let Some(version) = &ctx.facts.openshift_version {
        env.push(EnvVar::new("OPENSHIFT_VERSION", version.clone()));
    }
    if let Some(proxy) = &ctx.facts.proxy {
        let proxy_vars = [
            ("HTTP_PROXY", &proxy.http_proxy),
            ("HTTPS_PROXY", &proxy.https_proxy),
            ("NO_PROXY", &proxy.no_proxy),
        ];
        for (name, value) in proxy_vars {
            if let Some(value) = value {
                env.push(EnvVar::new(name, value.clone()));
                env.push(EnvVar::new(name.to_lowercase(), value.clone()));
            }
        }
    }
    let env = merge_env(env, &spec.env);

    let app_name = naming::app_name(spec.driver_type, &cr_name, &pool.name);
    let labels = BTreeMap::from([
        ("app".to_string(), app_name.clone()),
        (COMPONENT_LABEL.to_string(), COMPONENT_VALUE.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ]);
    let mut pod_labels = strip_reserved_keys(&spec.labels);
    pod_labels.extend(labels.clone());
    pod_labels.insert(DRIVER_TYPE_LABEL.to_string(), spec.driver_type.as_str().to_string());

    let driver = DriverData {
        name: naming::daemonset_name(spec.driver_type, &cr_name, &pool.name),
        app_name,
        service_account_name: naming::service_account_name(&cr_name),
        cr_name,
        driver_type: spec.driver_type.as_str().to_string(),
        image_path: driver_image,
        image_pull_policy: pull_policy(spec.image_pull_policy.as_ref()),
        image_pull_secrets: spec.image_pull_secrets.clone(),
        args: spec.args.clone(),
        env,
        startup_probe: ProbeData {
            initial_delay_seconds: 60,
            timeout_seconds: 60,
            period_seconds: 10,
            success_threshold: 1,
            failure_threshold: 120,
        }
        .with_overrides(spec.startup_probe.as_ref()),
        liveness_probe: ProbeData {
            initial_delay_seconds: 60,
            timeout_seconds: 60,
            period_seconds: 10,
            success_threshold: 1,
            failure_threshold: 1,
        }
        .with_overrides(spec.liveness_probe.as_ref()),
        readiness_probe: ProbeData {
            initial_delay_seconds: 10,
            timeout_seconds: 60,
            period_seconds: 10,
            success_threshold: 1,
            failure_threshold: 1,
        }
        .with_overrides(spec.readiness_probe.as_ref()),
        resources: spec.resources.clone(),
        node_affinity: spec.node_affinity.clone(),
        tolerations: spec.tolerations.clone(),
        labels,
        pod_labels,
        pod_annotations: strip_reserved_keys(&spec.annotations),
        priority_class_name: spec
            .priority_class_name
            .clone()
            .unwrap_or_else(|| DEFAULT_PRIORITY_CLASS.to_string()),
        host_root: spec
            .host_paths
            .as_ref()
            .and_then(|paths| paths.root_fs.clone())
            .unwrap_or_else(|| DEFAULT_HOST_ROOT.to_string()),
        use_precompiled: spec.use_precompiled,
        use_open_kernel_modules: spec.use_open_kernel_modules,
    };

    Ok(DriverRenderData {
        driver,
        manager,
        gds,
        gdrcopy,
        rdma,
        toolkit,
        pool: pool.clone(),
        runtime: RuntimeData {
            namespace: ctx.config.operator_namespace.clone(),
            kubernetes_version: ctx.facts.kubernetes_version.clone(),
            openshift_version: ctx.facts.openshift_version.clone(),
        },
        additional_configs: additional_configs(ctx.configs, pool)?,
    })
}

#[cfg(test)]
#[path = "data_test.rs"]
mod data_test;
