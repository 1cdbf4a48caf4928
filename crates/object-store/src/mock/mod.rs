//! Mock ObjectStore for unit testing
//!
//! In-memory store keyed by object identity (kind, namespace, name). Writes
//! bump `resourceVersion`, creates of existing objects fail with
//! `AlreadyExists`, and replaces with a stale `resourceVersion` fail with
//! `Conflict`, so controller logic sees the same optimistic concurrency
//! behaviour as against a real API server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crds::{NVIDIADriver, NVIDIADriverStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::{ApiResource, DynamicObject};

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::ObjectStore;

/// Identity of a stored object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }
}

/// Write operation recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Replace,
    Delete,
}

/// Mock ObjectStore for testing
#[derive(Clone, Debug)]
pub struct MockObjectStore {
    pub(crate) nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    pub(crate) objects: Arc<Mutex<BTreeMap<ObjectKey, DynamicObject>>>,
    pub(crate) config_maps: Arc<Mutex<BTreeMap<(String, String), ConfigMap>>>,
    pub(crate) secrets: Arc<Mutex<BTreeMap<(String, String), Secret>>>,
    pub(crate) drivers: Arc<Mutex<BTreeMap<String, NVIDIADriver>>>,
    pub(crate) writes: Arc<Mutex<Vec<(WriteOp, ObjectKey)>>>,
    pub(crate) pending_conflicts: Arc<Mutex<u32>>,
    pub(crate) call_delay: Arc<Mutex<Option<Duration>>>,
    pub(crate) server_version: Arc<Mutex<String>>,
    pub(crate) status_patches: Arc<AtomicU64>,
    // Counter for resourceVersion / uid generation
    pub(crate) next_version: Arc<AtomicU64>,
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn object_labels(object: &DynamicObject) -> BTreeMap<String, String> {
    object.metadata.labels.clone().unwrap_or_default()
}

fn spec_of(object: &DynamicObject) -> serde_json::Value {
    let mut data = object.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

impl MockObjectStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(Mutex::new(BTreeMap::new())),
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            config_maps: Arc::new(Mutex::new(BTreeMap::new())),
            secrets: Arc::new(Mutex::new(BTreeMap::new())),
            drivers: Arc::new(Mutex::new(BTreeMap::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
            pending_conflicts: Arc::new(Mutex::new(0)),
            call_delay: Arc::new(Mutex::new(None)),
            server_version: Arc::new(Mutex::new("v1.30.0".to_string())),
            status_patches: Arc::new(AtomicU64::new(0)),
            next_version: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Add a node (for test setup)
    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        lock(&self.nodes).insert(name, node);
    }

    pub fn remove_node(&self, name: &str) {
        lock(&self.nodes).remove(name);
    }

    /// Add an object (for test setup); missing uid/resourceVersion are generated
    pub fn add_object(&self, resource: &ApiResource, mut object: DynamicObject) {
        let key = self.key_for(resource, &object);
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(format!("uid-{}", self.bump()));
        }
        if object.metadata.resource_version.is_none() {
            object.metadata.resource_version = Some(self.bump().to_string());
        }
        lock(&self.objects).insert(key, object);
    }

    /// Add a ConfigMap (for test setup)
    pub fn add_config_map(&self, config_map: ConfigMap) {
        let key = (
            config_map.metadata.namespace.clone().unwrap_or_default(),
            config_map.metadata.name.clone().unwrap_or_default(),
        );
        lock(&self.config_maps).insert(key, config_map);
    }

    /// Add a Secret (for test setup)
    pub fn add_secret(&self, secret: Secret) {
        let key = (
            secret.metadata.namespace.clone().unwrap_or_default(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        lock(&self.secrets).insert(key, secret);
    }

    /// Add an NVIDIADriver (for test setup)
    pub fn add_driver(&self, driver: NVIDIADriver) {
        let name = driver.metadata.name.clone().unwrap_or_default();
        lock(&self.drivers).insert(name, driver);
    }

    /// Remove an NVIDIADriver, as a delete without finalizers would
    pub fn remove_driver(&self, name: &str) {
        lock(&self.drivers).remove(name);
    }

    pub fn set_server_version(&self, version: &str) {
        *lock(&self.server_version) = version.to_string();
    }

    /// Make the next `count` replace calls fail with `Conflict`
    pub fn inject_conflicts(&self, count: u32) {
        *lock(&self.pending_conflicts) = count;
    }

    /// Delay every store call, to exercise deadlines
    pub fn set_call_delay(&self, delay: Option<Duration>) {
        *lock(&self.call_delay) = delay;
    }

    /// Overwrite the `status` of a stored object, as a workload controller would
    pub fn set_status(&self, kind: &str, namespace: Option<&str>, name: &str, status: serde_json::Value) {
        let key = ObjectKey::new(kind, namespace, name);
        if let Some(object) = lock(&self.objects).get_mut(&key) {
            if let Some(map) = object.data.as_object_mut() {
                map.insert("status".to_string(), status);
            }
        }
    }

    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        lock(&self.objects)
            .get(&ObjectKey::new(kind, namespace, name))
            .cloned()
    }

    pub fn objects_of_kind(&self, kind: &str) -> Vec<DynamicObject> {
        lock(&self.objects)
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(_, object)| object.clone())
            .collect()
    }

    pub fn driver(&self, name: &str) -> Option<NVIDIADriver> {
        lock(&self.drivers).get(name).cloned()
    }

    /// Number of NVIDIADriver status patches
    pub fn status_patches(&self) -> u64 {
        self.status_patches.load(Ordering::SeqCst)
    }

    /// All writes performed through the trait, in order
    pub fn writes(&self) -> Vec<(WriteOp, ObjectKey)> {
        lock(&self.writes).clone()
    }

    pub fn deleted(&self) -> Vec<ObjectKey> {
        lock(&self.writes)
            .iter()
            .filter(|(op, _)| *op == WriteOp::Delete)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn key_for(&self, resource: &ApiResource, object: &DynamicObject) -> ObjectKey {
        ObjectKey::new(
            &resource.kind,
            object.metadata.namespace.as_deref(),
            object.metadata.name.as_deref().unwrap_or_default(),
        )
    }

    fn record(&self, op: WriteOp, key: ObjectKey) {
        lock(&self.writes).push((op, key));
    }

    async fn delay(&self) {
        let delay = *lock(&self.call_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockObjectStore {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, StoreError> {
        self.delay().await;
        let selector = LabelSelector::parse(label_selector)?;
        Ok(lock(&self.nodes)
            .values()
            .filter(|node| selector.matches(&node.metadata.labels.clone().unwrap_or_default()))
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        self.delay().await;
        Ok(lock(&self.objects)
            .get(&ObjectKey::new(&resource.kind, namespace, name))
            .cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        self.delay().await;
        let selector = LabelSelector::parse(label_selector)?;
        Ok(lock(&self.objects)
            .iter()
            .filter(|(key, _)| key.kind == resource.kind)
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .filter(|(_, object)| selector.matches(&object_labels(object)))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.delay().await;
        if object.metadata.name.is_none() {
            return Err(StoreError::InvalidObject("object has no metadata.name".to_string()));
        }
        let key = self.key_for(resource, object);
        let mut objects = lock(&self.objects);
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("{} {}", key.kind, key.name)));
        }
        let mut created = object.clone();
        if let Some(map) = created.data.as_object_mut() {
            map.remove("status");
        }
        created.metadata.uid = Some(format!("uid-{}", self.bump()));
        created.metadata.resource_version = Some(self.bump().to_string());
        created.metadata.generation = Some(1);
        objects.insert(key.clone(), created.clone());
        drop(objects);
        self.record(WriteOp::Create, key);
        Ok(created)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.delay().await;
        let key = self.key_for(resource, object);
        {
            let mut pending = lock(&self.pending_conflicts);
            if *pending > 0 {
                *pending -= 1;
                return Err(StoreError::Conflict(format!("{} {}: injected", key.kind, key.name)));
            }
        }
        let mut objects = lock(&self.objects);
        let existing = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", key.kind, key.name)))?;
        if let Some(version) = &object.metadata.resource_version {
            if existing.metadata.resource_version.as_ref() != Some(version) {
                return Err(StoreError::Conflict(format!(
                    "{} {}: resourceVersion {version} is stale",
                    key.kind, key.name
                )));
            }
        }

        let mut replaced = object.clone();
        let generation = existing.metadata.generation.unwrap_or(1);
        replaced.metadata.generation = Some(if spec_of(existing) == spec_of(object) {
            generation
        } else {
            generation + 1
        });
        replaced.metadata.uid = existing.metadata.uid.clone();
        replaced.metadata.resource_version = Some(self.bump().to_string());
        if let Some(map) = replaced.data.as_object_mut() {
            match existing.data.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        objects.insert(key.clone(), replaced.clone());
        drop(objects);
        self.record(WriteOp::Replace, key);
        Ok(replaced)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.delay().await;
        let key = ObjectKey::new(&resource.kind, namespace, name);
        if lock(&self.objects).remove(&key).is_some() {
            self.record(WriteOp::Delete, key);
        }
        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError> {
        self.delay().await;
        Ok(lock(&self.config_maps)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        self.delay().await;
        Ok(lock(&self.secrets)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_drivers(&self) -> Result<Vec<NVIDIADriver>, StoreError> {
        self.delay().await;
        Ok(lock(&self.drivers).values().cloned().collect())
    }

    async fn patch_driver_status(
        &self,
        name: &str,
        status: &NVIDIADriverStatus,
    ) -> Result<(), StoreError> {
        self.delay().await;
        let mut drivers = lock(&self.drivers);
        let driver = drivers
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(format!("NVIDIADriver {name}")))?;
        driver.status = Some(status.clone());
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn server_version(&self) -> Result<String, StoreError> {
        self.delay().await;
        Ok(lock(&self.server_version).clone())
    }
}
