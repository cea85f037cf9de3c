//! Worker side of the dispatcher protocol
//!
//! A worker repeatedly takes a unit from a [`WorkSource`], evaluates it and
//! reports the verdict back. The source is the HTTP client for remote workers
//! and the in-process engine for local runs.

pub mod runner;

use async_trait::async_trait;

use crate::models::{DispatchMode, WorkUnit};

pub use runner::{RunnerConfig, RunnerError, ShutdownHandle, WorkerRunner, WorkerStats, WorkerStatsSnapshot};

/// Where units come from and where verdicts go
#[async_trait]
pub trait WorkSource: Send + Sync + 'static {
    /// Error type of the source
    type Error: std::error::Error + Send + Sync + 'static;

    /// Take the next unit for `mode`
    ///
    /// Blocks while nothing is pending. `Ok(None)` means the source is closed.
    async fn next_unit(&self, mode: DispatchMode) -> Result<Option<WorkUnit>, Self::Error>;

    /// Return an evaluated unit
    async fn report(&self, unit: &WorkUnit) -> Result<(), Self::Error>;

    /// Whether `error` is worth retrying after a delay
    fn is_transient(&self, error: &Self::Error) -> bool;
}
