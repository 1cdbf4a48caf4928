//! NVIDIADriver CRD
//!
//! Declares how the NVIDIA GPU driver is deployed onto a set of GPU nodes.
//! The controller renders one driver DaemonSet per node pool selected by
//! this resource.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{
    ConfigObjectRef, ContainerProbeSpec, EnvVar, ResourceRequirements, Toleration,
};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "nvidia.com",
    version = "v1alpha1",
    kind = "NVIDIADriver",
    shortname = "nvd",
    status = "NVIDIADriverStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NVIDIADriverSpec {
    /// Kind of driver to deploy
    #[serde(default)]
    pub driver_type: DriverType,

    /// Use driver images with kernel modules prebuilt for a specific kernel
    #[serde(default)]
    pub use_precompiled: bool,

    /// Load the open GPU kernel modules instead of the proprietary ones
    #[serde(default)]
    pub use_open_kernel_modules: bool,

    /// Driver image registry path (e.g. `nvcr.io/nvidia`)
    #[serde(default)]
    pub repository: String,

    /// Driver image name
    pub image: String,

    /// Driver version, or an image digest (`sha256:...`)
    pub version: String,

    /// Image pull policy for the driver containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Names of image pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    /// Driver manager init container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<DriverManagerSpec>,

    /// GPUDirect Storage (nvidia-fs) add-on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gds: Option<AddonDriverSpec>,

    /// GDRCopy add-on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gdrcopy: Option<AddonDriverSpec>,

    /// GPUDirect RDMA (peer memory) add-on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdma: Option<GpuDirectRdmaSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<ContainerProbeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ContainerProbeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ContainerProbeSpec>,

    /// Extra arguments passed to the driver container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment for the driver container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Resource requirements for the driver container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Additional node selector narrowing the GPU nodes this driver targets
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Node affinity for the driver pods (core/v1 NodeAffinity)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub node_affinity: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Labels added to the driver pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations added to the driver pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    /// Host filesystem locations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_paths: Option<HostPathsSpec>,

    /// vGPU licensing configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensing_config: Option<DriverLicensingConfigSpec>,

    /// ConfigMap with package repository files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_config: Option<ConfigObjectRef>,

    /// ConfigMap with custom CA certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_config: Option<ConfigObjectRef>,

    /// ConfigMap with kernel module parameter files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_module_config: Option<ConfigObjectRef>,

    /// ConfigMap with the vGPU topology daemon configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_topology_config: Option<ConfigObjectRef>,
}

/// Driver flavour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DriverType {
    /// Bare-metal / passthrough GPU driver
    #[default]
    Gpu,

    /// vGPU guest driver
    Vgpu,

    /// vGPU host manager
    VgpuHostManager,
}

impl DriverType {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverType::Gpu => "gpu",
            DriverType::Vgpu => "vgpu",
            DriverType::VgpuHostManager => "vgpu-host-manager",
        }
    }

    /// True for driver types that consume vGPU configuration
    pub fn is_vgpu(self) -> bool {
        matches!(self, DriverType::Vgpu | DriverType::VgpuHostManager)
    }
}

impl std::fmt::Display for DriverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DriverManagerSpec {
    /// Image registry path; empty means the controller default
    #[serde(default)]
    pub repository: String,

    /// Image name; empty means the controller default
    #[serde(default)]
    pub image: String,

    /// Image version or digest
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Optional driver add-on delivered as an extra container
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AddonDriverSpec {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub repository: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GpuDirectRdmaSpec {
    #[serde(default)]
    pub enabled: bool,

    /// Use the MOFED drivers installed directly on the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_host_mofed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostPathsSpec {
    /// Path to the host root filesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_fs: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DriverLicensingConfigSpec {
    /// ConfigMap holding `gridd.conf` (and the NLS token when enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    /// Secret holding the licensing files; preferred over the ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Enable NVIDIA License System token mounting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nls_enabled: Option<bool>,
}

impl NVIDIADriverSpec {
    pub fn gds_enabled(&self) -> bool {
        self.gds.as_ref().is_some_and(|gds| gds.enabled)
    }

    pub fn gdrcopy_enabled(&self) -> bool {
        self.gdrcopy.as_ref().is_some_and(|gdrcopy| gdrcopy.enabled)
    }

    pub fn rdma_enabled(&self) -> bool {
        self.rdma.as_ref().is_some_and(|rdma| rdma.enabled)
    }

    /// True when the user pinned the driver manager image
    pub fn manager_image_overridden(&self) -> bool {
        self.manager
            .as_ref()
            .is_some_and(|manager| !manager.image.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NVIDIADriverStatus {
    /// Aggregate driver state
    #[serde(default)]
    pub state: DriverState,

    /// Namespace the driver objects are deployed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Ready / Error conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<DriverCondition>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Aggregate state of an NVIDIADriver
///
/// Serializes as camelCase ("ready", "notReady").
#[serde(rename_all = "camelCase")]
pub enum DriverState {
    #[default]
    #[serde(alias = "NotReady")]
    NotReady,

    #[serde(alias = "Ready")]
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverCondition {
    /// Condition type (`Ready` or `Error`)
    #[serde(rename = "type")]
    pub type_: String,

    /// `True`, `False` or `Unknown`
    pub status: String,

    /// Machine readable reason
    #[serde(default)]
    pub reason: String,

    /// Human readable message
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
