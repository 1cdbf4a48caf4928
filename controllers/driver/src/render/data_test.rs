//! Unit tests for render data assembly

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use crds::{
        AddonDriverSpec, ConfigObjectRef, DriverLicensingConfigSpec, DriverManagerSpec, DriverType, EnvVar,
        GpuDirectRdmaSpec, NVIDIADriverSpec,
    };
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use object_store::MockObjectStore;

    use crate::cluster_info::{ClusterFacts, ProxySettings};
    use crate::deadline::Deadline;
    use crate::error::ControllerError;
    use crate::nodepool::{partition_nodes, driver_node_selector, NodePool};
    use crate::render::data::*;
    use crate::test_utils::{config_map, driver_spec, gpu_node, make_driver, rhcos_node, test_config, TEST_MANAGER_IMAGE, TEST_NAMESPACE};

    fn ubuntu_pool() -> NodePool {
        let nodes = vec![gpu_node("n1", "ubuntu", "22.04", "5.15.0-91-generic")];
        partition_nodes(&nodes, &driver_node_selector(&BTreeMap::new()), false, false).remove(0)
    }

    fn assemble_for(spec: NVIDIADriverSpec, facts: &ClusterFacts, pool: &NodePool) -> Result<DriverRenderData, ControllerError> {
        let driver = make_driver("default", spec);
        let config = test_config();
        let configs = ReferencedConfigs::default();
        assemble(&AssembleContext { driver: &driver, facts, config: &config, configs: &configs }, pool)
    }

    fn env_value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
        env.iter().find(|var| var.name == name).and_then(|var| var.value.as_deref())
    }

    #[test]
    fn test_basic_render_data() {
        let data = assemble_for(driver_spec(), &ClusterFacts::default(), &ubuntu_pool()).unwrap();
        assert_eq!(data.driver.image_path, "nvcr.io/nvidia/driver:550.90.07-ubuntu22.04");
        assert_eq!(data.driver.image_pull_policy, "IfNotPresent");
        assert_eq!(data.driver.priority_class_name, "system-node-critical");
        assert_eq!(data.driver.host_root, "/");
        assert_eq!(data.manager.image_path, TEST_MANAGER_IMAGE);
        assert_eq!(data.runtime.namespace, TEST_NAMESPACE);
        assert_eq!(env_value(&data.driver.env, "KERNEL_MODULE_TYPE"), Some("proprietary"));
        assert!(data.gds.is_none() && data.gdrcopy.is_none() && data.rdma.is_none() && data.toolkit.is_none());
        assert!(data.driver.name.starts_with("nvidia-gpu-driver-default-ubuntu22.04-"));
        assert!(data.driver.app_name.len() <= 63);
        assert_eq!(data.driver.labels.get("app"), Some(&data.driver.app_name));
    }

    #[test]
    fn test_precompiled_image_has_kernel_suffix() {
        let nodes = vec![gpu_node("n1", "ubuntu", "22.04", "5.15.0-1043-nvidia")];
        let pool = partition_nodes(&nodes, &driver_node_selector(&BTreeMap::new()), true, false).remove(0);
        let spec = NVIDIADriverSpec { use_precompiled: true, version: "535".to_string(), ..driver_spec() };
        let data = assemble_for(spec, &ClusterFacts::default(), &pool).unwrap();
        assert_eq!(data.driver.image_path, "nvcr.io/nvidia/driver:535-5.15.0-1043-nvidia-ubuntu22.04");
        assert_eq!(env_value(&data.driver.env, "USE_PRECOMPILED"), Some("true"));
    }

    #[test]
    fn test_digest_version_is_used_verbatim() {
        let spec = NVIDIADriverSpec { version: "sha256:0123abcd".to_string(), ..driver_spec() };
        let data = assemble_for(spec, &ClusterFacts::default(), &ubuntu_pool()).unwrap();
        assert_eq!(data.driver.image_path, "nvcr.io/nvidia/driver@sha256:0123abcd");
    }

    #[test]
    fn test_manager_image_resolution() {
        let spec = NVIDIADriverSpec {
            manager: Some(DriverManagerSpec {
                repository: "registry.local/nvidia".to_string(),
                image: "k8s-driver-manager".to_string(),
                version: "v0.7.0".to_string(),
                env: vec![EnvVar::new("ENABLE_AUTO_DRAIN", "true")],
                ..Default::default()
            }),
            ..driver_spec()
        };
        let data = assemble_for(spec, &ClusterFacts::default(), &ubuntu_pool()).unwrap();
        assert_eq!(data.manager.image_path, "registry.local/nvidia/k8s-driver-manager:v0.7.0");
        assert_eq!(env_value(&data.manager.env, "ENABLE_AUTO_DRAIN"), Some("true"));
        assert_eq!(env_value(&data.manager.env, "ENABLE_GPU_POD_EVICTION"), Some("true"));

        let driver = make_driver("default", driver_spec());
        let mut config = test_config();
        config.driver_manager_image = None;
        let configs = ReferencedConfigs::default();
        let facts = ClusterFacts::default();
        let err = assemble(&AssembleContext { driver: &driver, facts: &facts, config: &config, configs: &configs }, &ubuntu_pool())
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidImage(_)));
    }

    #[test]
    fn test_user_env_overrides_computed_env() {
        let spec = NVIDIADriverSpec {
            use_open_kernel_modules: true,
            env: vec![EnvVar::new("KERNEL_MODULE_TYPE", "auto"), EnvVar::new("EXTRA", "1")],
            ..driver_spec()
        };
        let data = assemble_for(spec, &ClusterFacts::default(), &ubuntu_pool()).unwrap();
        let names: Vec<_> = data.driver.env.iter().map(|var| var.name.as_str()).collect();
        assert_eq!(names, vec!["KERNEL_MODULE_TYPE", "EXTRA"]);
        assert_eq!(env_value(&data.driver.env, "KERNEL_MODULE_TYPE"), Some("auto"));
    }

    #[test]
    fn test_addons_and_rdma() {
        let addon = AddonDriverSpec {
            enabled: true,
            repository: "nvcr.io/nvidia/cloud-native".to_string(),
            image: "nvidia-fs".to_string(),
            version: "2.17.5".to_string(),
            ..Default::default()
        };
        let spec = NVIDIADriverSpec {
            gds: Some(addon.clone()),
            gdrcopy: Some(AddonDriverSpec { enabled: false, ..addon }),
            rdma: Some(GpuDirectRdmaSpec { enabled: true, use_host_mofed: Some(true) }),
            ..driver_spec()
        };
        let data = assemble_for(spec, &ClusterFacts::default(), &ubuntu_pool()).unwrap();
        assert_eq!(data.gds.unwrap().image_path, "nvcr.io/nvidia/cloud-native/nvidia-fs:2.17.5-ubuntu22.04");
        assert!(data.gdrcopy.is_none());
        assert_eq!(data.rdma.unwrap().use_host_mofed, Some(true));
        assert_eq!(env_value(&data.driver.env, "GPU_DIRECT_RDMA_ENABLED"), Some("true"));
    }

    #[test]
    fn test_enabled_addon_without_image_is_invalid() {
        let spec = NVIDIADriverSpec {
            gdrcopy: Some(AddonDriverSpec { enabled: true, ..Default::default() }),
            ..driver_spec()
        };
        let err = assemble_for(spec, &ClusterFacts::default(), &ubuntu_pool()).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidImage(_)));
    }

    #[test]
    fn test_openshift_toolkit_and_proxy() {
        let nodes = vec![rhcos_node("n1", "414.92.202310170514-0")];
        let pool = partition_nodes(&nodes, &driver_node_selector(&BTreeMap::new()), false, true).remove(0);
        let mut facts = ClusterFacts {
            kubernetes_version: "v1.27.6".to_string(),
            openshift_version: Some("4.14.3".to_string()),
            proxy: Some(ProxySettings { https_proxy: Some("http://proxy:3128".to_string()), ..Default::default() }),
            ..Default::default()
        };

        let err = assemble_for(driver_spec(), &facts, &pool).unwrap_err();
        assert!(matches!(err, ControllerError::MissingConfig(_)));

        facts
            .toolkit_images
            .insert("414.92.202310170514-0".to_string(), "quay.io/openshift/dtk@sha256:abc".to_string());
        let data = assemble_for(driver_spec(), &facts, &pool).unwrap();
        assert_eq!(data.toolkit.unwrap().image_path, "quay.io/openshift/dtk@sha256:abc");
        assert_eq!(env_value(&data.driver.env, "OPENSHIFT_VERSION"), Some("4.14.3"));
        assert_eq!(env_value(&data.driver.env, "HTTPS_PROXY"), Some("http://proxy:3128"));
        assert_eq!(env_value(&data.driver.env, "https_proxy"), Some("http://proxy:3128"));
        assert_eq!(env_value(&data.driver.env, "HTTP_PROXY"), None);
    }

    #[test]
    fn test_reserved_labels_are_stripped() {
        let spec = NVIDIADriverSpec {
            labels: BTreeMap::from([
                ("app".to_string(), "mine".to_string()),
                ("app.kubernetes.io/name".to_string(), "mine".to_string()),
                ("team".to_string(), "ml".to_string()),
            ]),
            annotations: BTreeMap::from([("app.kubernetes.io/part-of".to_string(), "x".to_string())]),
            ..driver_spec()
        };
        let data = assemble_for(spec, &ClusterFacts::default(), &ubuntu_pool()).unwrap();
        assert_eq!(data.driver.pod_labels.get("team").map(String::as_str), Some("ml"));
        assert_eq!(data.driver.pod_labels.get("app"), Some(&data.driver.app_name));
        assert_eq!(data.driver.pod_labels.get("app.kubernetes.io/name"), None);
        assert_eq!(data.driver.pod_labels.get(COMPONENT_LABEL).map(String::as_str), Some(COMPONENT_VALUE));
        assert!(data.driver.pod_annotations.is_empty());
    }

    #[test]
    fn test_probe_overrides() {
        let spec = NVIDIADriverSpec {
            startup_probe: Some(crds::ContainerProbeSpec { failure_threshold: Some(60), ..Default::default() }),
            ..driver_spec()
        };
        let data = assemble_for(spec, &ClusterFacts::default(), &ubuntu_pool()).unwrap();
        assert_eq!(data.driver.startup_probe.failure_threshold, 60);
        assert_eq!(data.driver.startup_probe.initial_delay_seconds, 60);
        assert_eq!(data.driver.readiness_probe.initial_delay_seconds, 10);
    }

    #[test]
    fn test_additional_configs_per_os() {
        let configs = ReferencedConfigs {
            repo: Some(ConfigFiles { name: "repos".to_string(), keys: vec!["cuda.list".to_string()] }),
            kernel_modules: Some(ConfigFiles { name: "modules".to_string(), keys: vec!["nvidia.conf".to_string()] }),
            ..Default::default()
        };
        let additional = additional_configs(&configs, &ubuntu_pool()).unwrap();
        assert_eq!(additional.volumes.len(), 2);
        let paths: Vec<_> = additional.volume_mounts.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(paths, vec!["/etc/apt/sources.list.d/cuda.list", "/drivers/nvidia.conf"]);
        assert!(additional.volume_mounts.iter().all(|m| m.read_only && m.sub_path.is_some()));

        let mut pool = ubuntu_pool();
        pool.os_release = "rhel".to_string();
        let additional = additional_configs(&configs, &pool).unwrap();
        assert_eq!(additional.volume_mounts[0].mount_path, "/etc/yum.repos.d/cuda.list");

        pool.os_release = "flatcar".to_string();
        let err = additional_configs(&configs, &pool).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSpec(_)));
    }

    #[test]
    fn test_licensing_mounts() {
        let configs = ReferencedConfigs {
            licensing: Some(LicensingFiles { source: LicensingSource::Secret("licensing".to_string()), nls_enabled: true }),
            ..Default::default()
        };
        let additional = additional_configs(&configs, &ubuntu_pool()).unwrap();
        let volume = &additional.volumes[0];
        assert_eq!(volume.secret.as_ref().unwrap().secret_name, "licensing");
        assert_eq!(volume.secret.as_ref().unwrap().items.len(), 2);
        let paths: Vec<_> = additional.volume_mounts.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/drivers/gridd.conf", "/drivers/ClientConfigToken/client_configuration_token.tok"]
        );
    }

    #[tokio::test]
    async fn test_fetch_referenced_configs() {
        let store = MockObjectStore::new();
        store.add_config_map(config_map("repos", &["b.list", "a.list"]));
        let deadline = Deadline::after(Duration::from_secs(5));

        let spec = NVIDIADriverSpec {
            repo_config: Some(ConfigObjectRef { name: "repos".to_string() }),
            ..driver_spec()
        };
        let configs = ReferencedConfigs::fetch(&store, &deadline, TEST_NAMESPACE, &spec).await.unwrap();
        assert_eq!(configs.repo.unwrap().keys, vec!["a.list", "b.list"]);

        let spec = NVIDIADriverSpec {
            cert_config: Some(ConfigObjectRef { name: "absent".to_string() }),
            ..driver_spec()
        };
        let err = ReferencedConfigs::fetch(&store, &deadline, TEST_NAMESPACE, &spec).await.unwrap_err();
        assert!(matches!(err, ControllerError::MissingConfig(_)));
    }

    #[tokio::test]
    async fn test_licensing_requires_token_when_nls_enabled() {
        let store = MockObjectStore::new();
        store.add_secret(Secret {
            metadata: ObjectMeta {
                name: Some("licensing".to_string()),
                namespace: Some(TEST_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("gridd.conf".to_string(), ByteString(b"x".to_vec()))])),
            ..Default::default()
        });
        let deadline = Deadline::after(Duration::from_secs(5));
        let mut spec = NVIDIADriverSpec {
            driver_type: DriverType::Vgpu,
            licensing_config: Some(DriverLicensingConfigSpec {
                secret_name: Some("licensing".to_string()),
                config_map_name: Some("ignored".to_string()),
                nls_enabled: Some(false),
            }),
            ..driver_spec()
        };
        let configs = ReferencedConfigs::fetch(&store, &deadline, TEST_NAMESPACE, &spec).await.unwrap();
        assert_eq!(
            configs.licensing,
            Some(LicensingFiles { source: LicensingSource::Secret("licensing".to_string()), nls_enabled: false })
        );

        if let Some(licensing) = spec.licensing_config.as_mut() {
            licensing.nls_enabled = Some(true);
        }
        let err = ReferencedConfigs::fetch(&store, &deadline, TEST_NAMESPACE, &spec).await.unwrap_err();
        assert!(matches!(err, ControllerError::MissingConfig(_)));
    }
}
