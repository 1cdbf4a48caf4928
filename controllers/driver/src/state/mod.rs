//! Ordered state pipeline.
//!
//! A pass runs each unit in order; a unit that does not report `Ready`
//! (units reporting `Ignore` do not take part) stops the pipeline and its
//! state becomes the result of the pass.
//!
//! Units:
//! - `state-driver-cleanup`: deletes driver DaemonSets whose pool is gone
//! - `state-driver`: converges one driver DaemonSet per node pool

pub mod cleanup;
pub mod driver;

use crds::NVIDIADriver;
use object_store::ObjectStore;
use tracing::{debug, info};

use crate::cluster_info::ClusterFacts;
use crate::config::ControllerConfig;
use crate::deadline::Deadline;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::render::Renderer;

pub use cleanup::CleanupState;
pub use driver::DriverState;

/// Outcome of one unit, or of a whole pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Ready,
    NotReady,
    Error,
    /// Unit does not apply to this NVIDIADriver
    Ignore,
    /// NVIDIADriver is being deleted
    Reset,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Ready => "ready",
            SyncState::NotReady => "notReady",
            SyncState::Error => "error",
            SyncState::Ignore => "ignore",
            SyncState::Reset => "reset",
        }
    }

    /// Combine per-unit states: any `Error` wins, then `Reset`, then
    /// `NotReady`; `Ready` only if every participating unit is `Ready`.
    pub fn aggregate<I>(states: I) -> SyncState
    where
        I: IntoIterator<Item = SyncState>,
    {
        let mut result = SyncState::Ignore;
        for state in states {
            result = match (result, state) {
                (SyncState::Error, _) | (_, SyncState::Error) => SyncState::Error,
                (SyncState::Reset, _) | (_, SyncState::Reset) => SyncState::Reset,
                (SyncState::NotReady, _) | (_, SyncState::NotReady) => SyncState::NotReady,
                (SyncState::Ready, _) | (_, SyncState::Ready) => SyncState::Ready,
                (SyncState::Ignore, SyncState::Ignore) => SyncState::Ignore,
            };
        }
        result
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a unit needs for one pass
pub struct SyncContext<'a> {
    pub driver: &'a NVIDIADriver,
    pub store: &'a dyn ObjectStore,
    pub config: &'a ControllerConfig,
    pub facts: &'a ClusterFacts,
    pub metrics: &'a Metrics,
    pub deadline: Deadline,
}

impl SyncContext<'_> {
    pub fn driver_name(&self) -> &str {
        self.driver.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        &self.config.operator_namespace
    }
}

/// A unit of the pipeline
#[async_trait::async_trait]
pub trait State: Send + Sync {
    fn name(&self) -> &'static str;

    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncState, ControllerError>;
}

/// Result of a pipeline run
#[derive(Debug)]
pub struct PipelineOutcome {
    /// State of every unit that ran, in order
    pub results: Vec<(&'static str, SyncState)>,
    pub overall: SyncState,
}

/// Runs the units in order
pub struct StateManager {
    states: Vec<Box<dyn State>>,
}

impl StateManager {
    /// Pipeline of `states`, run in the given order
    pub fn new(states: Vec<Box<dyn State>>) -> Self {
        Self { states }
    }

    /// The driver pipeline: stale reaping, then per-pool convergence
    pub fn for_driver(config: &ControllerConfig) -> Self {
        Self::new(vec![
            Box::new(CleanupState),
            Box::new(DriverState::new(Renderer::new(&config.manifests_dir))),
        ])
    }

    pub fn state_names(&self) -> Vec<&'static str> {
        self.states.iter().map(|state| state.name()).collect()
    }

    /// Run the pipeline. Errors from a unit abort the pass.
    pub async fn sync(&self, ctx: &SyncContext<'_>) -> Result<PipelineOutcome, ControllerError> {
        let mut results = Vec::with_capacity(self.states.len());
        for state in &self.states {
            let result = state.sync(ctx).await?;
            debug!(driver = %ctx.driver_name(), state = state.name(), result = %result, "State synced");
            results.push((state.name(), result));
            if !matches!(result, SyncState::Ready | SyncState::Ignore) {
                info!(driver = %ctx.driver_name(), state = state.name(), result = %result, "Pipeline stopped");
                return Ok(PipelineOutcome { results, overall: result });
            }
        }
        let overall = SyncState::aggregate(results.iter().map(|(_, state)| *state));
        Ok(PipelineOutcome { results, overall })
    }
}
