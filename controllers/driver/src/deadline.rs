//! Per-pass deadline shared by every store call of a reconciliation.

use std::future::Future;
use std::time::Duration;

use object_store::StoreError;
use tokio::time::Instant;

use crate::error::ControllerError;

/// Point in time every store call of a pass must finish by
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// This deadline, or a fresh one of `grace` once it has passed
    pub fn or_grace(self, grace: Duration) -> Self {
        if self.is_expired() {
            Self::after(grace)
        } else {
            self
        }
    }

    /// Await a store call, failing with `DeadlineExceeded` once the pass is out of time
    pub async fn run<T, F>(&self, call: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout_at(self.at, call).await {
            Ok(result) => result.map_err(ControllerError::from),
            Err(_elapsed) => Err(ControllerError::DeadlineExceeded(self.budget)),
        }
    }
}
