//! Worker pool
//!
//! ```text
//! ┌──────────┐  unit channel  ┌─────────────┐   report   ┌──────────┐
//! │  Poller  │───────────────▶│ Evaluator×N │───────────▶│  Source  │
//! └──────────┘                └─────────────┘            └──────────┘
//! ```
//!
//! One poller feeds a bounded channel; `concurrency` evaluator tasks share its
//! receiver. Transient source errors are retried forever with a fixed delay;
//! after shutdown, units already taken are still evaluated and reported.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::WorkSource;
use crate::config::WorkerConfig;
use crate::models::{DispatchMode, WorkUnit};
use crate::utils::retry::{with_retry_if, RetryConfig};

// ============================================================================
// Configuration
// ============================================================================

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Which endpoint pair to use
    pub mode: DispatchMode,

    /// Number of evaluator tasks
    pub concurrency: usize,

    /// Delay between attempts after a transient error
    pub retry_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Split,
            concurrency: 1,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&WorkerConfig> for RunnerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            mode: config.mode,
            concurrency: config.concurrency.max(1),
            retry_delay: config.retry_delay(),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Worker statistics (thread-safe)
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Units evaluated
    pub units_evaluated: AtomicU64,

    /// Divisor units whose divisor divided the candidate
    pub divisors_found: AtomicU64,

    /// Whole units found prime
    pub primes_found: AtomicU64,

    /// Verdicts delivered
    pub reports_sent: AtomicU64,

    /// Verdicts dropped after a permanent error
    pub report_failures: AtomicU64,

    /// Failed poll attempts
    pub poll_failures: AtomicU64,
}

impl WorkerStats {
    /// Create new stats counter
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record_evaluation(&self, unit: &WorkUnit) {
        self.units_evaluated.fetch_add(1, Ordering::Relaxed);
        match unit {
            WorkUnit::Division(sub) if sub.divides == Some(true) => {
                self.divisors_found.fetch_add(1, Ordering::Relaxed);
            }
            WorkUnit::Whole(check) if check.is_prime == Some(true) => {
                self.primes_found.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            units_evaluated: self.units_evaluated.load(Ordering::Relaxed),
            divisors_found: self.divisors_found.load(Ordering::Relaxed),
            primes_found: self.primes_found.load(Ordering::Relaxed),
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
            report_failures: self.report_failures.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of worker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub units_evaluated: u64,
    pub divisors_found: u64,
    pub primes_found: u64,
    pub reports_sent: u64,
    pub report_failures: u64,
    pub poll_failures: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Runner errors
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The source refused a poll with a non-transient error
    #[error("Polling failed: {0}")]
    Poll(#[source] Box<dyn std::error::Error + Send + Sync>),
}

// ============================================================================
// Runner
// ============================================================================

/// Requests a running [`WorkerRunner`] to stop
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Stop polling; units already taken are still evaluated and reported
    pub fn shutdown(&self) {
        if !self.0.send_replace(true) {
            tracing::info!("Worker shutting down, finishing taken units");
        }
    }
}

/// Polls a [`WorkSource`] and evaluates units on a task pool
pub struct WorkerRunner<S: WorkSource> {
    source: Arc<S>,
    config: RunnerConfig,
    stats: Arc<WorkerStats>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<S: WorkSource> WorkerRunner<S> {
    /// Create a runner over `source`
    pub fn new(source: S, config: RunnerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            source: Arc::new(source),
            config,
            stats: WorkerStats::new(),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Handle that stops this runner
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Live statistics
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown, until the source closes, or until a poll fails permanently
    pub async fn run(&self) -> Result<WorkerStatsSnapshot, RunnerError> {
        let concurrency = self.config.concurrency.max(1);
        tracing::info!(
            mode = %self.config.mode,
            concurrency,
            "Starting worker"
        );

        let (unit_tx, unit_rx) = mpsc::channel::<WorkUnit>(concurrency);
        let handles = self.spawn_evaluators(unit_rx, concurrency);

        let outcome = self.poll_loop(unit_tx).await;

        // the channel is closed; evaluators drain what was taken and exit
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Evaluator task panicked");
            }
        }

        let snapshot = self.stats.snapshot();
        tracing::info!(
            evaluated = snapshot.units_evaluated,
            reported = snapshot.reports_sent,
            dropped = snapshot.report_failures,
            "Worker stopped"
        );

        outcome.map(|_| snapshot)
    }

    async fn poll_loop(&self, unit_tx: mpsc::Sender<WorkUnit>) -> Result<(), RunnerError> {
        let mut shutdown = self.shutdown.subscribe();
        let retry = RetryConfig::fixed_forever(self.config.retry_delay);
        let mode = self.config.mode;

        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
                polled = with_retry_if(
                    &retry,
                    || {
                        let source = Arc::clone(&self.source);
                        async move { source.next_unit(mode).await }
                    },
                    |e| {
                        self.stats.poll_failures.fetch_add(1, Ordering::Relaxed);
                        self.source.is_transient(e)
                    },
                ) => polled,
            };

            match polled {
                Ok(Some(unit)) => {
                    if unit.mode() != mode {
                        tracing::warn!(candidate = unit.candidate(), "Ignoring unit of the other mode");
                        continue;
                    }
                    if unit_tx.send(unit).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    tracing::info!("Work source closed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Polling failed permanently");
                    return Err(RunnerError::Poll(Box::new(e)));
                }
            }
        }
    }

    fn spawn_evaluators(
        &self,
        unit_rx: mpsc::Receiver<WorkUnit>,
        concurrency: usize,
    ) -> Vec<JoinHandle<()>> {
        let unit_rx = Arc::new(Mutex::new(unit_rx));
        let retry = RetryConfig::fixed_forever(self.config.retry_delay);
        let mut handles = Vec::with_capacity(concurrency);

        for worker_id in 0..concurrency {
            let unit_rx = Arc::clone(&unit_rx);
            let source = Arc::clone(&self.source);
            let stats = Arc::clone(&self.stats);
            let retry = retry.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = unit_rx.lock().await.recv().await;
                    let Some(unit) = next else {
                        break;
                    };

                    let unit = unit.evaluate();
                    stats.record_evaluation(&unit);

                    let reported = with_retry_if(
                        &retry,
                        || {
                            let source = Arc::clone(&source);
                            let unit = unit.clone();
                            async move { source.report(&unit).await }
                        },
                        |e| source.is_transient(e),
                    )
                    .await;

                    match reported {
                        Ok(()) => {
                            stats.reports_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            stats.report_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                worker_id,
                                key = ?unit.key(),
                                error = %e,
                                "Verdict refused; dropping"
                            );
                        }
                    }
                }
                tracing::debug!(worker_id, "Evaluator finished");
            }));
        }

        handles
    }
}
