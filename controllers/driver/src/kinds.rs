//! Object kinds the driver manifests may contain.

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{ApiResource, DynamicObject};

use crate::error::ControllerError;

/// Kinds the controller creates and owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedKind {
    ServiceAccount,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    ConfigMap,
    DaemonSet,
}

impl ManagedKind {
    /// Kind of a rendered object, from its `apiVersion` and `kind`
    pub fn of(object: &DynamicObject) -> Result<Self, ControllerError> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| ControllerError::InvalidObject("rendered object has no apiVersion/kind".to_string()))?;
        let kind = match (types.api_version.as_str(), types.kind.as_str()) {
            ("v1", "ServiceAccount") => ManagedKind::ServiceAccount,
            ("v1", "ConfigMap") => ManagedKind::ConfigMap,
            ("rbac.authorization.k8s.io/v1", "Role") => ManagedKind::Role,
            ("rbac.authorization.k8s.io/v1", "RoleBinding") => ManagedKind::RoleBinding,
            ("rbac.authorization.k8s.io/v1", "ClusterRole") => ManagedKind::ClusterRole,
            ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding") => ManagedKind::ClusterRoleBinding,
            ("apps/v1", "DaemonSet") => ManagedKind::DaemonSet,
            (api_version, kind) => {
                return Err(ControllerError::InvalidObject(format!(
                    "unsupported object {api_version}/{kind} in driver manifests"
                )));
            }
        };
        Ok(kind)
    }

    /// Dynamic API resource for store calls
    pub fn api_resource(self) -> ApiResource {
        match self {
            ManagedKind::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            ManagedKind::Role => ApiResource::erase::<Role>(&()),
            ManagedKind::RoleBinding => ApiResource::erase::<RoleBinding>(&()),
            ManagedKind::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            ManagedKind::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
            ManagedKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ManagedKind::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
        }
    }

    pub fn is_namespaced(self) -> bool {
        !matches!(self, ManagedKind::ClusterRole | ManagedKind::ClusterRoleBinding)
    }
}
