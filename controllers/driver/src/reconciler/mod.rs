//! Reconciliation of NVIDIADriver resources.
//!
//! One pass validates the NVIDIADriver against its peers, discovers cluster
//! facts and runs the state pipeline, all under a single deadline. This is
//! the only place where pipeline results and errors are translated into the
//! NVIDIADriver status and a requeue decision. The status patch runs under
//! the same deadline, or a short grace period when the pass used it all up.

pub mod status;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crds::NVIDIADriver;
use kube_runtime::controller::Action;
use object_store::ObjectStore;
use tracing::{debug, error, info, warn};

use crate::backoff::FibonacciBackoff;
use crate::cluster_info::ClusterFacts;
use crate::config::ControllerConfig;
use crate::deadline::Deadline;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::state::{StateManager, SyncContext, SyncState};
use crate::validation::check_node_selector_conflicts;

use status::{desired_status, status_needs_update, PassOutcome};

/// Longest time a status patch may take after the pass deadline passed
const STATUS_GRACE: Duration = Duration::from_secs(5);

/// Reconciles NVIDIADriver resources.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    config: ControllerConfig,
    metrics: Metrics,
    states: StateManager,
    backoff: FibonacciBackoff,
    /// Consecutive input errors per NVIDIADriver
    error_counts: Mutex<HashMap<String, u32>>,
}

impl Reconciler {
    /// Reconciler running the driver pipeline
    pub fn new(store: Arc<dyn ObjectStore>, config: ControllerConfig, metrics: Metrics) -> Self {
        let states = StateManager::for_driver(&config);
        Self::with_states(store, config, metrics, states)
    }

    /// Reconciler running a custom pipeline
    pub fn with_states(
        store: Arc<dyn ObjectStore>,
        config: ControllerConfig,
        metrics: Metrics,
        states: StateManager,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            states,
            backoff: FibonacciBackoff::default(),
            error_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn next_error_delay(&self, name: &str) -> Duration {
        let mut counts = self.error_counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(name.to_string()).or_insert(0);
        let delay = self.backoff.delay(*count);
        *count = count.saturating_add(1);
        delay
    }

    fn reset_errors(&self, name: &str) {
        self.error_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Forget error counts of NVIDIADrivers that no longer exist
    fn prune_errors(&self, drivers: &[NVIDIADriver]) {
        self.error_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|name, _| drivers.iter().any(|driver| driver.metadata.name.as_deref() == Some(name.as_str())));
    }

    #[cfg(test)]
    fn tracked_errors(&self) -> Vec<String> {
        let counts = self.error_counts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = counts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate, discover and run the pipeline under one deadline
    async fn run_pass(&self, driver: &NVIDIADriver, deadline: Deadline) -> Result<SyncState, ControllerError> {
        let store = self.store.as_ref();

        let drivers = deadline.run(store.list_drivers()).await?;
        self.prune_errors(&drivers);
        check_node_selector_conflicts(store, &deadline, driver, &drivers).await?;
        let facts = ClusterFacts::discover(store, &deadline).await?;

        let ctx = SyncContext {
            driver,
            store,
            config: &self.config,
            facts: &facts,
            metrics: &self.metrics,
            deadline,
        };
        match tokio::time::timeout_at(deadline.at(), self.states.sync(&ctx)).await {
            Ok(outcome) => Ok(outcome?.overall),
            Err(_elapsed) => Err(ControllerError::DeadlineExceeded(deadline.budget())),
        }
    }

    /// Reconcile one NVIDIADriver and publish its status
    pub async fn reconcile_driver(&self, driver: &NVIDIADriver) -> Result<Action, ControllerError> {
        let name = driver.metadata.name.clone().unwrap_or_default();
        let _timer = self.metrics.reconcile_duration.start_timer();

        if driver.metadata.deletion_timestamp.is_some() {
            info!(driver = %name, "NVIDIADriver is being deleted, owned objects are left to garbage collection");
            self.reset_errors(&name);
            self.metrics.reconcile_total.with_label_values(&[SyncState::Reset.as_str()]).inc();
            return Ok(Action::await_change());
        }

        debug!(driver = %name, generation = ?driver.metadata.generation, "Reconciling NVIDIADriver");
        let deadline = Deadline::after(self.config.reconcile_timeout);
        let (outcome, action, result) = match self.run_pass(driver, deadline).await {
            Ok(SyncState::Ready) => {
                self.reset_errors(&name);
                info!(driver = %name, "NVIDIADriver is ready");
                (Some(PassOutcome::Ready), Action::await_change(), "ready")
            }
            Ok(SyncState::NotReady) => {
                self.reset_errors(&name);
                let outcome = PassOutcome::NotReady {
                    reason: "DriverNotReady".to_string(),
                    message: "Driver DaemonSets are not ready yet".to_string(),
                };
                (Some(outcome), Action::requeue(self.config.requeue_delay), "notReady")
            }
            Ok(SyncState::Error) => {
                let outcome = PassOutcome::Failed {
                    reason: "StateError".to_string(),
                    message: "A driver state reported an error".to_string(),
                };
                (Some(outcome), Action::requeue(self.next_error_delay(&name)), "error")
            }
            Ok(state @ (SyncState::Ignore | SyncState::Reset)) => {
                debug!(driver = %name, state = %state, "Nothing to publish");
                (None, Action::await_change(), state.as_str())
            }
            Err(err) if err.is_transient() => {
                warn!(driver = %name, error = %err, "Reconciliation pass failed, retrying");
                let outcome = PassOutcome::NotReady {
                    reason: err.reason().to_string(),
                    message: err.to_string(),
                };
                (Some(outcome), Action::requeue(self.config.requeue_delay), "transientError")
            }
            Err(err) => {
                let delay = self.next_error_delay(&name);
                error!(driver = %name, error = %err, requeue_after = ?delay, "NVIDIADriver cannot be reconciled");
                let outcome = PassOutcome::Failed {
                    reason: err.reason().to_string(),
                    message: err.to_string(),
                };
                (Some(outcome), Action::requeue(delay), "error")
            }
        };

        self.metrics.reconcile_total.with_label_values(&[result]).inc();
        if let Some(outcome) = outcome {
            let grace = self.config.reconcile_timeout.min(STATUS_GRACE);
            self.publish_status(driver, &outcome, deadline.or_grace(grace)).await?;
        }
        Ok(action)
    }

    async fn publish_status(
        &self,
        driver: &NVIDIADriver,
        outcome: &PassOutcome,
        deadline: Deadline,
    ) -> Result<(), ControllerError> {
        let name = driver.metadata.name.as_deref().unwrap_or_default();
        let status = desired_status(
            driver.status.as_ref(),
            &self.config.operator_namespace,
            outcome,
            chrono::Utc::now(),
        );
        if !status_needs_update(driver.status.as_ref(), &status) {
            debug!(driver = %name, "Status already up to date");
            return Ok(());
        }
        deadline.run(self.store.patch_driver_status(name, &status)).await?;
        debug!(driver = %name, state = ?status.state, "Status updated");
        Ok(())
    }
}
