//! In-process generation
//!
//! Runs the dispatch engine and a worker pool in one process, without HTTP.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::{CoordinatorConfig, DispatchEngine, EngineError};
use crate::models::{DispatchMode, WorkUnit};
use crate::storage::StorageEngine;
use crate::worker::{RunnerConfig, WorkSource, WorkerRunner, WorkerStatsSnapshot};

/// [`WorkSource`] backed directly by a dispatch engine
#[derive(Clone)]
pub struct LocalSource {
    engine: Arc<DispatchEngine>,
}

impl LocalSource {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl WorkSource for LocalSource {
    type Error = EngineError;

    async fn next_unit(&self, mode: DispatchMode) -> Result<Option<WorkUnit>, EngineError> {
        self.engine.request_work(mode).await
    }

    async fn report(&self, unit: &WorkUnit) -> Result<(), EngineError> {
        self.engine.report(unit.clone()).await
    }

    fn is_transient(&self, _error: &EngineError) -> bool {
        false
    }
}

/// Summary of a local run
#[derive(Debug, Clone)]
pub struct LocalSummary {
    pub resumed_after: u64,
    pub last_prime: u64,
    pub last_assigned_id: u64,
    pub worker: WorkerStatsSnapshot,
}

/// Generate primes into the ledger until `limit` (exclusive) or Ctrl-C
pub async fn run_local(config: &Config, limit: Option<u64>) -> anyhow::Result<LocalSummary> {
    let storage = Arc::new(StorageEngine::open(config.storage.clone())?);

    let mut builder =
        CoordinatorConfig::from_settings(&config.dispatcher)?.enable_request_logging(false);
    if let Some(limit) = limit {
        builder = builder.limit(limit);
    }
    let engine = DispatchEngine::start(builder.build()?, Arc::clone(&storage)).await;
    let resumed_after = engine.stats().await.resumed_after;

    let runner = WorkerRunner::new(
        LocalSource::new(Arc::clone(&engine)),
        RunnerConfig {
            mode: engine.mode(),
            ..RunnerConfig::from(&config.worker)
        },
    );

    let stop_engine = Arc::clone(&engine);
    let supervisor = tokio::spawn(async move {
        let finished = tokio::select! {
            result = stop_engine.wait() => Some(result),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, flushing ledger");
                None
            }
        };
        // releases the workers' blocked polls
        stop_engine.shutdown();
        match finished {
            Some(result) => result,
            None => stop_engine.wait().await,
        }
    });

    let worker = runner.run().await;
    let ledger = supervisor.await?;

    ledger?;
    let worker = worker?;

    Ok(LocalSummary {
        resumed_after,
        last_prime: storage.last_prime().await,
        last_assigned_id: storage.last_assigned_id().await,
        worker,
    })
}
