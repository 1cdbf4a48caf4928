//! NVIDIADriver status construction.
//!
//! A status carries the aggregate state, the operator namespace and two
//! conditions, `Ready` and `Error`. Transition times only move when a
//! condition's status flips, so an unchanged pass produces an identical
//! status and no patch.

use chrono::{DateTime, Utc};
use crds::{DriverCondition, DriverState, NVIDIADriverStatus};

pub const READY_CONDITION: &str = "Ready";
pub const ERROR_CONDITION: &str = "Error";

const RECONCILED_REASON: &str = "Reconciled";

/// What a reconciliation pass amounts to, as far as status is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Ready,
    /// Still converging or hit a transient failure
    NotReady { reason: String, message: String },
    /// Needs a change to the NVIDIADriver or the cluster
    Failed { reason: String, message: String },
}

fn condition(
    previous: &[DriverCondition],
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> DriverCondition {
    let status = if status { "True" } else { "False" };
    let last_transition_time = previous
        .iter()
        .find(|c| c.type_ == type_ && c.status == status)
        .and_then(|c| c.last_transition_time)
        .unwrap_or(now);
    DriverCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Some(last_transition_time),
    }
}

/// Status to publish for `outcome`, keeping transition times from `previous`
pub fn desired_status(
    previous: Option<&NVIDIADriverStatus>,
    namespace: &str,
    outcome: &PassOutcome,
    now: DateTime<Utc>,
) -> NVIDIADriverStatus {
    let previous = previous.map(|s| s.conditions.as_slice()).unwrap_or_default();
    let (state, conditions) = match outcome {
        PassOutcome::Ready => (
            DriverState::Ready,
            vec![
                condition(previous, READY_CONDITION, true, RECONCILED_REASON, "All driver DaemonSets are ready", now),
                condition(previous, ERROR_CONDITION, false, RECONCILED_REASON, "", now),
            ],
        ),
        PassOutcome::NotReady { reason, message } => (
            DriverState::NotReady,
            vec![
                condition(previous, READY_CONDITION, false, reason, message, now),
                condition(previous, ERROR_CONDITION, false, RECONCILED_REASON, "", now),
            ],
        ),
        PassOutcome::Failed { reason, message } => (
            DriverState::NotReady,
            vec![
                condition(previous, READY_CONDITION, false, reason, message, now),
                condition(previous, ERROR_CONDITION, true, reason, message, now),
            ],
        ),
    };
    NVIDIADriverStatus {
        state,
        namespace: Some(namespace.to_string()),
        conditions,
    }
}

/// Check if status needs to be updated
pub fn status_needs_update(current: Option<&NVIDIADriverStatus>, desired: &NVIDIADriverStatus) -> bool {
    current != Some(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn not_ready() -> PassOutcome {
        PassOutcome::NotReady {
            reason: "DriverNotReady".to_string(),
            message: "rolling out".to_string(),
        }
    }

    #[test]
    fn test_ready_status() {
        let status = desired_status(None, "gpu-operator", &PassOutcome::Ready, at(100));
        assert_eq!(status.state, DriverState::Ready);
        assert_eq!(status.namespace.as_deref(), Some("gpu-operator"));
        assert_eq!(status.conditions[0].type_, READY_CONDITION);
        assert_eq!(status.conditions[0].status, "True");
        assert_eq!(status.conditions[1].type_, ERROR_CONDITION);
        assert_eq!(status.conditions[1].status, "False");
    }

    #[test]
    fn test_failed_status_sets_error_condition() {
        let outcome = PassOutcome::Failed {
            reason: "InvalidImage".to_string(),
            message: "bad tag".to_string(),
        };
        let status = desired_status(None, "gpu-operator", &outcome, at(100));
        assert_eq!(status.state, DriverState::NotReady);
        assert_eq!(status.conditions[1].status, "True");
        assert_eq!(status.conditions[1].reason, "InvalidImage");
        assert_eq!(status.conditions[1].message, "bad tag");
    }

    #[test]
    fn test_transition_time_kept_while_status_unchanged() {
        let first = desired_status(None, "gpu-operator", &not_ready(), at(100));
        let second = desired_status(Some(&first), "gpu-operator", &not_ready(), at(200));
        assert_eq!(first, second);
        assert!(!status_needs_update(Some(&first), &second));

        let ready = desired_status(Some(&second), "gpu-operator", &PassOutcome::Ready, at(300));
        assert_eq!(ready.conditions[0].last_transition_time, Some(at(300)));
        // Error stayed False
        assert_eq!(ready.conditions[1].last_transition_time, Some(at(100)));
        assert!(status_needs_update(Some(&second), &ready));
    }

    #[test]
    fn test_missing_status_needs_update() {
        let status = desired_status(None, "gpu-operator", &PassOutcome::Ready, at(100));
        assert!(status_needs_update(None, &status));
    }
}
