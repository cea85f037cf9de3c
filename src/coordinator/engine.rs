//! Dispatch engine
//!
//! Wires the candidate sequencer, divisor splitter, job dispatcher, result
//! aggregator and prime ledger into running tasks:
//!
//! ```text
//! feeder ──► dispatcher ──► (workers) ──► report ──► aggregator ─┬─► storage sink
//!   ▲                                                            └─► rejection sink
//!   └──────────────── window permit released on resolution ◄───────┘
//! ```

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};

use super::aggregator::{
    validate_verdict, BoardCounters, CandidateBoard, ResultAggregator, SharedBoard, VerdictError,
};
use super::config::CoordinatorConfig;
use super::dispatcher::{Dispatcher, DispatcherSnapshot};
use crate::metrics;
use crate::models::{CandidateCheck, DispatchMode, Resolution, SubComputation, UnitKey, WorkUnit};
use crate::primes::{splitter, CandidateSequencer};
use crate::storage::{StorageEngine, StorageError};
use crate::utils::{display_prime, display_rejection};

/// Reaper interval when re-dispatch is disabled
const LEASE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to callers of the engine
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Request for the endpoint pair of the inactive mode
    #[error("Dispatcher runs in {active} mode, not {requested}")]
    ModeMismatch {
        active: DispatchMode,
        requested: DispatchMode,
    },

    /// Returned unit could not be accepted
    #[error("Malformed verdict: {0}")]
    Verdict(#[from] VerdictError),

    /// The ledger failed; the dispatcher cannot continue
    #[error("Ledger failure: {0}")]
    Storage(Arc<StorageError>),
}

// ============================================================================
// Unit queue
// ============================================================================

/// The dispatcher of the active mode
#[derive(Debug, Clone)]
enum UnitQueue {
    Split(Arc<Dispatcher<SubComputation>>),
    Whole(Arc<Dispatcher<CandidateCheck>>),
}

impl UnitQueue {
    async fn request_work(&self) -> Option<WorkUnit> {
        match self {
            Self::Split(d) => d.request_work().await.map(WorkUnit::Division),
            Self::Whole(d) => d.request_work().await.map(WorkUnit::Whole),
        }
    }

    fn complete(&self, key: UnitKey) -> bool {
        match self {
            Self::Split(d) => d.complete(key),
            Self::Whole(d) => d.complete(key),
        }
    }

    fn reap_expired(&self) -> usize {
        match self {
            Self::Split(d) => d.reap_expired(),
            Self::Whole(d) => d.reap_expired(),
        }
    }

    fn snapshot(&self) -> DispatcherSnapshot {
        match self {
            Self::Split(d) => d.snapshot(),
            Self::Whole(d) => d.snapshot(),
        }
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Ledger part of [`EngineStats`]
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub last_assigned_id: u64,
    pub last_prime: u64,
    pub buffered: usize,
}

/// Snapshot served by `/api/stats`
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub mode: DispatchMode,
    pub resumed_after: u64,
    pub shutting_down: bool,
    pub pending_candidates: usize,
    pub queue: DispatcherSnapshot,
    pub verdicts: BoardCounters,
    pub ledger: LedgerStats,
}

/// Lifecycle of the storage sink
#[derive(Debug, Clone)]
enum SinkState {
    Running,
    Finished,
    Failed(Arc<StorageError>),
}

// ============================================================================
// Engine
// ============================================================================

/// Running dispatch pipeline
pub struct DispatchEngine {
    config: CoordinatorConfig,
    board: SharedBoard,
    queue: UnitQueue,
    verdict_tx: mpsc::Sender<WorkUnit>,
    storage: Arc<StorageEngine>,
    shutdown_tx: watch::Sender<bool>,
    sink_state: watch::Receiver<SinkState>,
    resumed_after: u64,
}

impl DispatchEngine {
    /// Spawn every task of the pipeline and return the engine handle
    ///
    /// Candidate generation resumes after the ledger's last prime.
    pub async fn start(config: CoordinatorConfig, storage: Arc<StorageEngine>) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (exhausted_tx, exhausted_rx) = watch::channel(false);
        let (sink_tx, sink_rx) = watch::channel(SinkState::Running);

        let capacity = config.queue_capacity;
        let (verdict_tx, verdict_rx) = mpsc::channel(capacity);
        let (confirmed_tx, confirmed_rx) = mpsc::channel(capacity);
        let (rejected_tx, rejected_rx) = mpsc::channel(capacity);

        let board = SharedBoard::new(CandidateBoard::new(config.retain_resolved));
        let window = Arc::new(Semaphore::new(config.window_size()));

        let resumed_after = storage.last_prime().await;
        let mut sequencer = CandidateSequencer::resume_after(resumed_after);
        if let Some(limit) = config.limit {
            sequencer = sequencer.with_limit(limit);
        }

        let feeder = Feeder {
            board: board.clone(),
            window,
            confirmed_tx: confirmed_tx.clone(),
            exhausted_tx,
            shutdown: shutdown_rx.clone(),
        };

        let queue = match config.mode {
            DispatchMode::Split => {
                let dispatcher = Arc::new(Dispatcher::new(
                    capacity,
                    board.clone(),
                    config.lease_timeout(),
                    shutdown_rx.clone(),
                ));
                tokio::spawn(feeder.run_split(sequencer, Arc::clone(&dispatcher)));
                UnitQueue::Split(dispatcher)
            }
            DispatchMode::Whole => {
                let dispatcher = Arc::new(Dispatcher::new(
                    capacity,
                    board.clone(),
                    config.lease_timeout(),
                    shutdown_rx.clone(),
                ));
                tokio::spawn(feeder.run_whole(sequencer, Arc::clone(&dispatcher)));
                UnitQueue::Whole(dispatcher)
            }
        };

        let aggregator = ResultAggregator::new(board.clone(), confirmed_tx, rejected_tx);
        tokio::spawn(aggregator.run(verdict_rx, exhausted_rx, shutdown_rx.clone()));

        tokio::spawn(storage_sink(Arc::clone(&storage), confirmed_rx, sink_tx));
        tokio::spawn(rejection_sink(rejected_rx, config.show_rejections));
        tokio::spawn(lease_reaper(
            queue.clone(),
            config.lease_timeout(),
            shutdown_rx,
        ));

        tracing::info!(
            mode = %config.mode,
            resumed_after,
            limit = ?config.limit,
            window = config.window_size(),
            "Dispatch engine started"
        );

        Arc::new(Self {
            config,
            board,
            queue,
            verdict_tx,
            storage,
            shutdown_tx,
            sink_state: sink_rx,
            resumed_after,
        })
    }

    /// Active dispatch mode
    pub fn mode(&self) -> DispatchMode {
        self.config.mode
    }

    /// Engine configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Ledger the engine writes to
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Take one unit for a worker polling in `mode`
    ///
    /// Blocks while nothing is pending. `Ok(None)` means the engine is shutting down.
    pub async fn request_work(&self, mode: DispatchMode) -> Result<Option<WorkUnit>, EngineError> {
        self.check_mode(mode)?;
        Ok(self.queue.request_work().await)
    }

    /// Accept a returned unit
    ///
    /// Malformed units are rejected here; everything else is queued for the
    /// aggregator, including late verdicts, which it discards.
    pub async fn report(&self, unit: WorkUnit) -> Result<(), EngineError> {
        self.check_mode(unit.mode())?;

        if let Err(e) = validate_verdict(&unit) {
            self.board.lock().record_malformed();
            metrics::record_anomaly("malformed");
            tracing::warn!(error = %e, "Rejecting malformed verdict");
            return Err(e.into());
        }

        self.queue.complete(unit.key());

        if self.verdict_tx.send(unit).await.is_err() {
            tracing::debug!("Verdict arrived after the aggregator stopped");
        }
        Ok(())
    }

    /// Begin graceful shutdown
    ///
    /// Stops candidate generation and wakes blocked polls. Confirmed primes
    /// still in flight are written and the buffer is flushed.
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            tracing::info!("Dispatch engine shutting down");
        }
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Wait until the storage sink has stopped
    ///
    /// Resolves after a limited run completes, after shutdown drained the
    /// sink, or with an error when the ledger failed.
    pub async fn wait(&self) -> Result<(), EngineError> {
        let mut state = self.sink_state.clone();
        let finished = state
            .wait_for(|s| !matches!(s, SinkState::Running))
            .await
            .map(|s| s.clone());

        match finished {
            Ok(SinkState::Failed(e)) => Err(EngineError::Storage(e)),
            _ => Ok(()),
        }
    }

    /// Stats snapshot
    pub async fn stats(&self) -> EngineStats {
        let (pending_candidates, verdicts) = {
            let board = self.board.lock();
            (board.pending_count(), board.counters())
        };

        EngineStats {
            mode: self.config.mode,
            resumed_after: self.resumed_after,
            shutting_down: self.is_shutting_down(),
            pending_candidates,
            queue: self.queue.snapshot(),
            verdicts,
            ledger: LedgerStats {
                last_assigned_id: self.storage.last_assigned_id().await,
                last_prime: self.storage.last_prime().await,
                buffered: self.storage.buffered().await,
            },
        }
    }

    fn check_mode(&self, requested: DispatchMode) -> Result<(), EngineError> {
        if requested == self.config.mode {
            Ok(())
        } else {
            Err(EngineError::ModeMismatch {
                active: self.config.mode,
                requested,
            })
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Turns candidates into queued units, one window permit per candidate
struct Feeder {
    board: SharedBoard,
    window: Arc<Semaphore>,
    confirmed_tx: mpsc::Sender<Resolution>,
    exhausted_tx: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
}

impl Feeder {
    async fn run_split(
        mut self,
        sequencer: CandidateSequencer,
        dispatcher: Arc<Dispatcher<SubComputation>>,
    ) {
        for candidate in sequencer {
            let Some(permit) = self.acquire_slot().await else {
                return;
            };

            let units = splitter::split(candidate);
            let resolved = self.board.lock().register(candidate, units.total(), Some(permit));

            if let Some(resolution) = resolved {
                metrics::record_resolution("confirmed");
                if self.confirmed_tx.send(resolution).await.is_err() {
                    return;
                }
                continue;
            }

            tracing::debug!(candidate, units = units.total(), "Splitting candidate");
            for unit in units {
                let pending = self.board.lock().is_pending(candidate);
                if !pending {
                    // rejected early; the rest of its divisors are not needed
                    break;
                }
                if dispatcher.submit(unit).await.is_err() {
                    return;
                }
            }
        }

        self.finish();
    }

    async fn run_whole(
        mut self,
        sequencer: CandidateSequencer,
        dispatcher: Arc<Dispatcher<CandidateCheck>>,
    ) {
        for candidate in sequencer {
            let Some(permit) = self.acquire_slot().await else {
                return;
            };

            self.board.lock().register(candidate, 1, Some(permit));
            if dispatcher.submit(CandidateCheck::new(candidate)).await.is_err() {
                return;
            }
        }

        self.finish();
    }

    async fn acquire_slot(&mut self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let window = Arc::clone(&self.window);
        tokio::select! {
            permit = window.acquire_owned() => permit.ok(),
            _ = self.shutdown.wait_for(|stop| *stop) => None,
        }
    }

    fn finish(self) {
        tracing::info!("Candidate range exhausted");
        self.exhausted_tx.send_replace(true);
    }
}

async fn storage_sink(
    storage: Arc<StorageEngine>,
    mut confirmed: mpsc::Receiver<Resolution>,
    state: watch::Sender<SinkState>,
) {
    while let Some(resolution) = confirmed.recv().await {
        match storage.append(resolution.value, resolution.elapsed).await {
            Ok(outcome) => {
                display_prime(resolution.value, resolution.elapsed);
                if let Some(report) = outcome.flushed {
                    tracing::info!(
                        shard = %report.shard,
                        written = report.written,
                        last_prime = report.largest,
                        "Flushed primes to ledger"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Ledger write failed");
                state.send_replace(SinkState::Failed(Arc::new(e)));
                return;
            }
        }
    }

    match storage.flush().await {
        Ok(Some(report)) => {
            tracing::info!(
                shard = %report.shard,
                written = report.written,
                "Flushed remaining primes"
            );
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "Final ledger flush failed");
            state.send_replace(SinkState::Failed(Arc::new(e)));
            return;
        }
    }

    state.send_replace(SinkState::Finished);
}

async fn rejection_sink(mut rejected: mpsc::Receiver<Resolution>, show: bool) {
    while let Some(resolution) = rejected.recv().await {
        if show {
            display_rejection(resolution.value, resolution.elapsed);
        }
        tracing::trace!(
            candidate = resolution.value,
            divisor = ?resolution.divisor,
            "Candidate rejected"
        );
    }
}

async fn lease_reaper(
    queue: UnitQueue,
    lease_timeout: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = lease_timeout
        .map(|t| (t / 2).max(Duration::from_millis(10)))
        .unwrap_or(LEASE_SWEEP_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                queue.reap_expired();
            }
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }
}
