//! Job dispatcher
//!
//! A bounded queue of pending units shared by every polling worker. Each poll
//! takes exactly one unit. Units whose candidate already resolved are skipped
//! at hand-out time, and handed-out units are leased so they can be put back
//! when a worker disappears.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use super::aggregator::SharedBoard;
use crate::metrics;
use crate::models::{CandidateCheck, DispatchMode, SubComputation, UnitKey, WorkUnit};

/// A unit the dispatcher can queue
pub trait Dispatchable: Clone + Send + Sync + 'static {
    /// Dispatch mode this unit type serves
    const MODE: DispatchMode;

    /// Identity of the unit within its candidate
    fn key(&self) -> UnitKey;

    /// Wrap into the mode-agnostic unit type
    fn into_work_unit(self) -> WorkUnit;
}

impl Dispatchable for SubComputation {
    const MODE: DispatchMode = DispatchMode::Split;

    fn key(&self) -> UnitKey {
        SubComputation::key(self)
    }

    fn into_work_unit(self) -> WorkUnit {
        WorkUnit::Division(self)
    }
}

impl Dispatchable for CandidateCheck {
    const MODE: DispatchMode = DispatchMode::Whole;

    fn key(&self) -> UnitKey {
        CandidateCheck::key(self)
    }

    fn into_work_unit(self) -> WorkUnit {
        WorkUnit::Whole(self)
    }
}

/// Dispatcher errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher is shutting down
    #[error("Dispatcher is shutting down")]
    ShuttingDown,
}

#[derive(Debug)]
struct Lease<T> {
    unit: T,
    leased_at: Instant,
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherSnapshot {
    pub pending: usize,
    pub leased: usize,
    pub dispatched: u64,
    pub abandoned: u64,
    pub requeued: u64,
}

/// Bounded multi-consumer work queue with leases
#[derive(Debug)]
pub struct Dispatcher<T> {
    tx: mpsc::Sender<T>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
    leases: Mutex<HashMap<UnitKey, Lease<T>>>,
    board: SharedBoard,
    lease_timeout: Option<Duration>,
    shutdown: watch::Receiver<bool>,
    dispatched: AtomicU64,
    abandoned: AtomicU64,
    requeued: AtomicU64,
}

impl<T: Dispatchable> Dispatcher<T> {
    /// Create a dispatcher holding at most `capacity` pending units
    ///
    /// `lease_timeout = None` disables re-dispatch of unanswered units.
    pub fn new(
        capacity: usize,
        board: SharedBoard,
        lease_timeout: Option<Duration>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            leases: Mutex::new(HashMap::new()),
            board,
            lease_timeout,
            shutdown,
            dispatched: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
        }
    }

    /// Enqueue a unit, waiting while the queue is full
    pub async fn submit(&self, unit: T) -> Result<(), DispatchError> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(DispatchError::ShuttingDown);
        }

        tokio::select! {
            sent = self.tx.send(unit) => sent.map_err(|_| DispatchError::ShuttingDown)?,
            _ = shutdown.wait_for(|stop| *stop) => return Err(DispatchError::ShuttingDown),
        }

        metrics::set_pending_units(self.pending());
        Ok(())
    }

    /// Take one unit, waiting while none is pending
    ///
    /// Returns `None` once shutdown begins. Units that are no longer needed are
    /// dropped here without being handed out.
    pub async fn request_work(&self) -> Option<T> {
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                return None;
            }

            let unit = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    continue;
                }
                unit = self.next_queued() => unit?,
            };

            // No await from here on: a cancelled poll cannot lose a unit
            // that was already taken off the queue.
            let key = unit.key();
            let live = self.board.lock().is_live(key);
            if !live {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                metrics::record_abandoned();
                tracing::trace!(?key, "Skipping unit of resolved candidate");
                continue;
            }

            self.lock_leases().insert(
                key,
                Lease {
                    unit: unit.clone(),
                    leased_at: Instant::now(),
                },
            );
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            metrics::record_dispatched(T::MODE.as_str());
            metrics::set_pending_units(self.pending());

            return Some(unit);
        }
    }

    /// Release the lease for a unit whose verdict arrived
    pub fn complete(&self, key: UnitKey) -> bool {
        self.lock_leases().remove(&key).is_some()
    }

    /// Drop leases of resolved units and requeue expired ones
    ///
    /// Returns the number of units put back on the queue.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();

        let expired: Vec<T> = {
            let board = self.board.lock();
            let mut leases = self.lock_leases();
            leases.retain(|key, _| board.is_live(*key));

            let Some(timeout) = self.lease_timeout else {
                return 0;
            };

            let keys: Vec<UnitKey> = leases
                .iter()
                .filter(|(_, lease)| now.duration_since(lease.leased_at) >= timeout)
                .map(|(key, _)| *key)
                .collect();

            keys.iter()
                .filter_map(|key| leases.remove(key))
                .map(|lease| lease.unit)
                .collect()
        };

        let mut requeued = 0;
        for unit in expired {
            match self.tx.try_send(unit) {
                Ok(()) => requeued += 1,
                Err(TrySendError::Full(unit) | TrySendError::Closed(unit)) => {
                    // queue is full; keep the lease and try again next round
                    self.lock_leases().insert(
                        unit.key(),
                        Lease {
                            unit,
                            leased_at: now,
                        },
                    );
                }
            }
        }

        if requeued > 0 {
            self.requeued.fetch_add(requeued as u64, Ordering::Relaxed);
            metrics::record_requeued(requeued);
            tracing::info!(requeued, "Requeued units with expired leases");
        }

        requeued
    }

    /// Units waiting in the queue
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Units handed out and not yet answered
    pub fn leased(&self) -> usize {
        self.lock_leases().len()
    }

    /// Lease timeout, if re-dispatch is enabled
    pub fn lease_timeout(&self) -> Option<Duration> {
        self.lease_timeout
    }

    /// Counter snapshot
    pub fn snapshot(&self) -> DispatcherSnapshot {
        DispatcherSnapshot {
            pending: self.pending(),
            leased: self.leased(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }

    async fn next_queued(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    fn lock_leases(&self) -> MutexGuard<'_, HashMap<UnitKey, Lease<T>>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
