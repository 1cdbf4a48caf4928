//! Stale driver DaemonSet reaping.
//!
//! A DaemonSet owned by the NVIDIADriver is stale when it schedules no pods
//! (`desiredNumberScheduled == 0` and `numberMisscheduled == 0`) and no live
//! node matches its pod node selector. Both conditions are required: a
//! DaemonSet whose nodes are only temporarily unschedulable is kept.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::DaemonSet;
use kube::api::{ApiResource, DynamicObject};
use object_store::format_selector;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ControllerError;
use crate::render::data::{COMPONENT_LABEL, COMPONENT_VALUE};
use crate::state::{State, SyncContext, SyncState};

/// Deletes driver DaemonSets whose node pool no longer exists
pub struct CleanupState;

/// DaemonSets of `owner_uid` carrying the driver component label
pub async fn owned_daemonsets(ctx: &SyncContext<'_>) -> Result<Vec<DynamicObject>, ControllerError> {
    let owner_uid = ctx.driver.metadata.uid.as_deref().unwrap_or_default();
    let selector = format!("{COMPONENT_LABEL}={COMPONENT_VALUE}");
    let daemonsets = ctx
        .deadline
        .run(ctx.store.list(&ApiResource::erase::<DaemonSet>(&()), Some(ctx.namespace()), &selector))
        .await?;
    Ok(daemonsets
        .into_iter()
        .filter(|ds| {
            ds.metadata
                .owner_references
                .iter()
                .flatten()
                .any(|owner| owner.uid == owner_uid)
        })
        .collect())
}

fn status_count(daemonset: &DynamicObject, field: &str) -> i64 {
    daemonset
        .data
        .pointer(&format!("/status/{field}"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn pod_node_selector(daemonset: &DynamicObject) -> BTreeMap<String, String> {
    daemonset
        .data
        .pointer("/spec/template/spec/nodeSelector")
        .and_then(Value::as_object)
        .map(|selector| {
            selector
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// True when the DaemonSet schedules nothing and its pool has no nodes left
pub async fn is_stale(ctx: &SyncContext<'_>, daemonset: &DynamicObject) -> Result<bool, ControllerError> {
    if status_count(daemonset, "desiredNumberScheduled") != 0 || status_count(daemonset, "numberMisscheduled") != 0 {
        return Ok(false);
    }
    let selector = pod_node_selector(daemonset);
    if selector.is_empty() {
        return Ok(false);
    }
    let nodes = ctx.deadline.run(ctx.store.list_nodes(&format_selector(&selector))).await?;
    Ok(nodes.is_empty())
}

#[async_trait::async_trait]
impl State for CleanupState {
    fn name(&self) -> &'static str {
        "state-driver-cleanup"
    }

    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncState, ControllerError> {
        let resource = ApiResource::erase::<DaemonSet>(&());
        for daemonset in owned_daemonsets(ctx).await? {
            let name = daemonset.metadata.name.as_deref().unwrap_or_default();
            if !is_stale(ctx, &daemonset).await? {
                debug!(daemonset = %name, "DaemonSet still matches nodes");
                continue;
            }
            ctx.deadline
                .run(ctx.store.delete(&resource, Some(ctx.namespace()), name))
                .await?;
            ctx.metrics.stale_daemonsets_deleted.inc();
            info!(driver = %ctx.driver_name(), daemonset = %name, "Deleted stale driver DaemonSet");
        }
        Ok(SyncState::Ready)
    }
}
