//! Create-or-update of rendered objects.
//!
//! Every object gets a controller owner reference to its NVIDIADriver so
//! deleting the CR garbage collects it. Updates carry the live
//! `resourceVersion`; conflicts are retried a bounded number of times.
//! A live object is only left alone when it already carries every rendered
//! field, label, annotation and owner reference.

use crds::NVIDIADriver;
use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::Resource;
use serde_json::Value;
use object_store::ObjectStore;
use tracing::{debug, info};

use crate::deadline::Deadline;
use crate::error::ControllerError;
use crate::kinds::ManagedKind;

/// Replace attempts after a conflicting write before giving up
pub const MAX_CONFLICT_RETRIES: u32 = 3;

/// What `create_or_update` did with the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOp {
    Created,
    Updated,
    Unchanged,
}

/// Object as stored after an apply
#[derive(Debug, Clone)]
pub struct Applied {
    pub object: DynamicObject,
    pub op: ApplyOp,
}

/// Make `owner` the controller of `object`, replacing any previous controller
pub fn set_owner_reference(object: &mut DynamicObject, owner: &NVIDIADriver) -> Result<(), ControllerError> {
    let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidObject("NVIDIADriver has no name or uid".to_string())
    })?;
    let refs = object.metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|existing| existing.uid != owner_ref.uid && existing.controller != Some(true));
    refs.push(owner_ref);
    Ok(())
}

fn contains_all(live: Option<&BTreeMap<String, String>>, desired: Option<&BTreeMap<String, String>>) -> bool {
    desired
        .into_iter()
        .flatten()
        .all(|(key, value)| live.and_then(|live| live.get(key)) == Some(value))
}

fn without_status(data: &Value) -> Value {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

/// Whether `live` already carries everything rendered into `desired`
pub fn is_up_to_date(desired: &DynamicObject, live: &DynamicObject) -> bool {
    let owners_kept = desired
        .metadata
        .owner_references
        .iter()
        .flatten()
        .all(|owner| live.metadata.owner_references.iter().flatten().any(|live| live == owner));
    owners_kept
        && contains_all(live.metadata.labels.as_ref(), desired.metadata.labels.as_ref())
        && contains_all(live.metadata.annotations.as_ref(), desired.metadata.annotations.as_ref())
        && without_status(&live.data) == without_status(&desired.data)
}

/// Create `desired`, or replace the live object unless it is already up to date.
pub async fn create_or_update(
    store: &dyn ObjectStore,
    deadline: &Deadline,
    kind: ManagedKind,
    desired: &DynamicObject,
) -> Result<Applied, ControllerError> {
    let resource = kind.api_resource();
    let name = desired
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidObject(format!("{} has no metadata.name", resource.kind)))?;
    let namespace = if kind.is_namespaced() {
        desired.metadata.namespace.as_deref()
    } else {
        None
    };

    let mut attempt = 0;
    loop {
        let live = deadline.run(store.get(&resource, namespace, name)).await?;
        let result = match live {
            None => deadline
                .run(store.create(&resource, desired))
                .await
                .map(|object| Applied { object, op: ApplyOp::Created }),
            Some(live) if is_up_to_date(desired, &live) => {
                debug!(kind = %resource.kind, name = %name, "Object is up to date");
                return Ok(Applied { object: live, op: ApplyOp::Unchanged });
            }
            Some(live) => {
                let mut update = desired.clone();
                update.metadata.resource_version = live.metadata.resource_version.clone();
                deadline
                    .run(store.replace(&resource, &update))
                    .await
                    .map(|object| Applied { object, op: ApplyOp::Updated })
            }
        };

        match result {
            Ok(applied) => {
                if applied.op != ApplyOp::Unchanged {
                    info!(kind = %resource.kind, name = %name, op = ?applied.op, "Applied object");
                }
                return Ok(applied);
            }
            Err(ControllerError::Store(e))
                if (e.is_conflict() || e.is_already_exists() || e.is_not_found()) && attempt < MAX_CONFLICT_RETRIES =>
            {
                attempt += 1;
                debug!(kind = %resource.kind, name = %name, attempt, error = %e, "Retrying apply after conflict");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{driver_spec, make_driver, TEST_NAMESPACE};
    use object_store::{MockObjectStore, StoreError, WriteOp};
    use k8s_openapi::api::core::v1::ServiceAccount;
    use kube::api::ApiResource;
    use std::time::Duration;

    fn service_account(name: &str) -> DynamicObject {
        let mut object = DynamicObject::new(name, &ApiResource::erase::<ServiceAccount>(&())).within(TEST_NAMESPACE);
        object.data = serde_json::json!({ "automountServiceAccountToken": true });
        object
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[test]
    fn test_owner_reference_is_controller() {
        let driver = make_driver("default", driver_spec());
        let mut object = service_account("sa");
        set_owner_reference(&mut object, &driver).unwrap();
        set_owner_reference(&mut object, &driver).unwrap();
        let refs = object.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "NVIDIADriver");
        assert_eq!(refs[0].uid, "uid-default");
        assert_eq!(refs[0].controller, Some(true));
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let mut driver = make_driver("default", driver_spec());
        driver.metadata.uid = None;
        let err = set_owner_reference(&mut service_account("sa"), &driver).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidObject(_)));
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let store = MockObjectStore::new();
        let mut desired = service_account("sa");

        let applied = create_or_update(&store, &deadline(), ManagedKind::ServiceAccount, &desired)
            .await
            .unwrap();
        assert_eq!(applied.op, ApplyOp::Created);

        let applied = create_or_update(&store, &deadline(), ManagedKind::ServiceAccount, &desired)
            .await
            .unwrap();
        assert_eq!(applied.op, ApplyOp::Unchanged);

        desired.data = serde_json::json!({ "automountServiceAccountToken": false });
        let applied = create_or_update(&store, &deadline(), ManagedKind::ServiceAccount, &desired)
            .await
            .unwrap();
        assert_eq!(applied.op, ApplyOp::Updated);
        assert_eq!(applied.object.data["automountServiceAccountToken"], serde_json::json!(false));

        let ops: Vec<_> = store.writes().into_iter().map(|(op, _)| op).collect();
        assert_eq!(ops, vec![WriteOp::Create, WriteOp::Replace]);
    }

    #[test]
    fn test_up_to_date_comparison() {
        let driver = make_driver("default", driver_spec());
        let mut desired = service_account("sa");
        set_owner_reference(&mut desired, &driver).unwrap();
        desired.metadata.labels = Some([("app".to_string(), "driver".to_string())].into());

        let mut live = desired.clone();
        live.metadata.resource_version = Some("7".to_string());
        live.metadata.labels.get_or_insert_with(Default::default).insert("extra".to_string(), "x".to_string());
        live.data["status"] = serde_json::json!({ "observed": true });
        assert!(is_up_to_date(&desired, &live));

        let mut relabeled = live.clone();
        relabeled.metadata.labels = Some([("app".to_string(), "other".to_string())].into());
        assert!(!is_up_to_date(&desired, &relabeled));

        let mut orphaned = live.clone();
        orphaned.metadata.owner_references = None;
        assert!(!is_up_to_date(&desired, &orphaned));

        let mut drifted = live;
        drifted.data["automountServiceAccountToken"] = serde_json::json!(false);
        assert!(!is_up_to_date(&desired, &drifted));
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let store = MockObjectStore::new();
        create_or_update(&store, &deadline(), ManagedKind::ServiceAccount, &service_account("sa"))
            .await
            .unwrap();

        let mut desired = service_account("sa");
        desired.data = serde_json::json!({ "automountServiceAccountToken": false });
        store.inject_conflicts(MAX_CONFLICT_RETRIES);
        let applied = create_or_update(&store, &deadline(), ManagedKind::ServiceAccount, &desired)
            .await
            .unwrap();
        assert_eq!(applied.op, ApplyOp::Updated);
    }

    #[tokio::test]
    async fn test_conflict_retries_are_bounded() {
        let store = MockObjectStore::new();
        create_or_update(&store, &deadline(), ManagedKind::ServiceAccount, &service_account("sa"))
            .await
            .unwrap();

        let mut desired = service_account("sa");
        desired.data = serde_json::json!({ "automountServiceAccountToken": false });
        store.inject_conflicts(MAX_CONFLICT_RETRIES + 1);
        let err = create_or_update(&store, &deadline(), ManagedKind::ServiceAccount, &desired)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Store(StoreError::Conflict(_))));
        assert!(err.is_transient());
    }
}
