//! Per-pool driver convergence.
//!
//! Every pool gets its own rendered manifest set. All pools are assembled and
//! rendered before anything is written, so an input error leaves the cluster
//! untouched. Objects shared by the pools (service account, RBAC) are applied
//! once per pass. The install config digest stored on each DaemonSet only
//! decides whether a new default driver manager image is adopted; the
//! rendered DaemonSet itself is always what gets applied.

use std::collections::HashSet;

use k8s_openapi::api::apps::v1::DaemonSet;
use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{debug, info};

use crate::apply::{create_or_update, set_owner_reference};
use crate::digest::{daemonset_hash, LAST_APPLIED_HASH_ANNOTATION, MANAGER_CONTAINER};
use crate::error::ControllerError;
use crate::kinds::ManagedKind;
use crate::nodepool::{driver_node_selector, get_node_pools};
use crate::render::data::{assemble, AssembleContext, ReferencedConfigs};
use crate::render::Renderer;
use crate::state::{State, SyncContext, SyncState};

/// Converges one driver DaemonSet per node pool, plus the objects it needs
pub struct DriverState {
    renderer: Renderer,
}

impl DriverState {
    /// Render the driver manifests with `renderer`
    pub fn new(renderer: Renderer) -> Self {
        Self { renderer }
    }
}

/// Typed view of a rendered or live DaemonSet
pub fn to_daemonset(object: &DynamicObject) -> Result<DaemonSet, ControllerError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Back to the dynamic form the store writes
pub fn to_dynamic(daemonset: &DaemonSet) -> Result<DynamicObject, ControllerError> {
    Ok(serde_json::from_value(serde_json::to_value(daemonset)?)?)
}

/// Image of the driver manager init container
pub fn manager_image(daemonset: &DaemonSet) -> Option<&str> {
    daemonset
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .init_containers
        .iter()
        .flatten()
        .find(|container| container.name == MANAGER_CONTAINER)?
        .image
        .as_deref()
}

fn set_manager_image(daemonset: &mut DaemonSet, image: &str) {
    let containers = daemonset
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|pod| pod.init_containers.as_mut());
    for container in containers.into_iter().flatten() {
        if container.name == MANAGER_CONTAINER {
            container.image = Some(image.to_string());
        }
    }
}

/// Install config digest recorded on a live DaemonSet
pub fn stored_hash(daemonset: &DaemonSet) -> Option<&str> {
    daemonset
        .metadata
        .annotations
        .as_ref()?
        .get(LAST_APPLIED_HASH_ANNOTATION)
        .map(String::as_str)
}

/// Keep the deployed driver manager image when only the controller default
/// changed.
///
/// Applies when the user did not pin the manager image and the live
/// DaemonSet runs a different one. If the desired DaemonSet with the live
/// manager image digests to the stored hash, nothing but the default moved
/// and the live image is kept; otherwise the new default is adopted along
/// with the other changes.
pub fn resolve_manager_image(
    desired: &mut DaemonSet,
    live: Option<&DaemonSet>,
    user_pinned: bool,
) -> Result<(), ControllerError> {
    if user_pinned {
        return Ok(());
    }
    let Some(live) = live else {
        return Ok(());
    };
    let (Some(live_image), Some(stored)) = (manager_image(live), stored_hash(live)) else {
        return Ok(());
    };
    if manager_image(desired) == Some(live_image) {
        return Ok(());
    }

    let mut candidate = desired.clone();
    set_manager_image(&mut candidate, live_image);
    if daemonset_hash(&candidate)? == stored {
        debug!(image = %live_image, "Keeping deployed driver manager image");
        *desired = candidate;
    }
    Ok(())
}

/// Store the install config digest on the DaemonSet and return it
pub fn set_hash_annotation(daemonset: &mut DaemonSet) -> Result<String, ControllerError> {
    let hash = daemonset_hash(daemonset)?;
    daemonset
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(LAST_APPLIED_HASH_ANNOTATION.to_string(), hash.clone());
    Ok(hash)
}

fn status_field(object: &DynamicObject, field: &str) -> i64 {
    object
        .data
        .pointer(&format!("/status/{field}"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Rollout state of a driver DaemonSet
pub fn daemonset_state(object: &DynamicObject) -> SyncState {
    let generation = object.metadata.generation.unwrap_or(0);
    let desired = status_field(object, "desiredNumberScheduled");
    let ready = status_field(object, "observedGeneration") >= generation
        && desired > 0
        && status_field(object, "updatedNumberScheduled") == desired
        && status_field(object, "numberAvailable") == desired
        && status_field(object, "numberUnavailable") == 0;
    if ready {
        SyncState::Ready
    } else {
        SyncState::NotReady
    }
}

impl DriverState {
    async fn apply_daemonset(&self, ctx: &SyncContext<'_>, object: DynamicObject) -> Result<SyncState, ControllerError> {
        let resource = ManagedKind::DaemonSet.api_resource();
        let name = object.metadata.name.clone().unwrap_or_default();
        let mut desired = to_daemonset(&object)?;

        let live = ctx
            .deadline
            .run(ctx.store.get(&resource, Some(ctx.namespace()), &name))
            .await?;
        let live = live.as_ref().map(to_daemonset).transpose()?;
        resolve_manager_image(&mut desired, live.as_ref(), ctx.driver.spec.manager_image_overridden())?;
        let hash = set_hash_annotation(&mut desired)?;

        let desired = to_dynamic(&desired)?;
        let applied = create_or_update(ctx.store, &ctx.deadline, ManagedKind::DaemonSet, &desired).await?;

        let state = daemonset_state(&applied.object);
        debug!(daemonset = %name, hash = %hash, op = ?applied.op, state = %state, "Driver DaemonSet synced");
        Ok(state)
    }
}

#[async_trait::async_trait]
impl State for DriverState {
    fn name(&self) -> &'static str {
        "state-driver"
    }

    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncState, ControllerError> {
        let spec = &ctx.driver.spec;
        let driver_name = ctx.driver_name().to_string();

        let selector = driver_node_selector(&spec.node_selector);
        let pools = ctx
            .deadline
            .run(get_node_pools(ctx.store, &selector, spec.use_precompiled, ctx.facts.is_openshift()))
            .await?;
        ctx.metrics
            .node_pools
            .with_label_values(&[driver_name.as_str()])
            .set(i64::try_from(pools.len()).unwrap_or(i64::MAX));
        if pools.is_empty() {
            return Err(ControllerError::NoNodePools(driver_name));
        }

        let configs = ReferencedConfigs::fetch(ctx.store, &ctx.deadline, ctx.namespace(), spec).await?;
        let assemble_ctx = AssembleContext {
            driver: ctx.driver,
            facts: ctx.facts,
            config: ctx.config,
            configs: &configs,
        };

        let mut rendered = Vec::new();
        let mut seen = HashSet::new();
        for pool in &pools {
            let data = assemble(&assemble_ctx, pool)?;
            for mut object in self.renderer.render_objects(&data)? {
                let kind = ManagedKind::of(&object)?;
                let identity = (kind, object.metadata.namespace.clone(), object.metadata.name.clone());
                if !seen.insert(identity) {
                    continue;
                }
                set_owner_reference(&mut object, ctx.driver)?;
                rendered.push((kind, object));
            }
        }

        let mut states = Vec::with_capacity(pools.len());
        for (kind, object) in rendered {
            if kind == ManagedKind::DaemonSet {
                states.push(self.apply_daemonset(ctx, object).await?);
            } else {
                create_or_update(ctx.store, &ctx.deadline, kind, &object).await?;
            }
        }

        let state = SyncState::aggregate(states);
        info!(driver = %driver_name, pools = pools.len(), state = %state, "Driver pools synced");
        Ok(state)
    }
}
