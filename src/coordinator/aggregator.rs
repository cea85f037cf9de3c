//! Result aggregator
//!
//! Folds verdicts into a per-candidate state machine. A candidate is rejected by
//! the first "divides" verdict and confirmed once every one of its divisors has
//! answered "does not divide". Late and repeated verdicts never change a
//! resolved candidate.

use serde::Serialize;
use fixedbitset::FixedBitSet;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit};

use crate::metrics;
use crate::models::{CandidateCheck, Resolution, SubComputation, UnitKey, WorkUnit};
use crate::primes::splitter;

/// Resolved candidates remembered by default
pub const DEFAULT_RETAIN_RESOLVED: usize = 4096;

// ============================================================================
// Verdict validation
// ============================================================================

/// Reasons a returned unit cannot be folded into the board
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerdictError {
    /// The verdict field was not filled in
    #[error("Unit for candidate {candidate} carries no verdict")]
    MissingVerdict { candidate: u64 },

    /// Sequence id past the candidate's split
    #[error("Sequence id {sequence_id} out of range for candidate {candidate} ({total} units)")]
    SequenceOutOfRange {
        candidate: u64,
        sequence_id: u64,
        total: u64,
    },

    /// Divisor does not match the sequence id
    #[error("Divisor {divisor} does not belong to sequence id {sequence_id} of candidate {candidate}")]
    DivisorMismatch {
        candidate: u64,
        sequence_id: u64,
        divisor: u64,
    },
}

/// Check a returned unit against the split it claims to come from
pub fn validate_verdict(unit: &WorkUnit) -> Result<(), VerdictError> {
    if !unit.has_verdict() {
        return Err(VerdictError::MissingVerdict {
            candidate: unit.candidate(),
        });
    }

    if let WorkUnit::Division(sub) = unit {
        let total = splitter::count(sub.candidate);
        if sub.sequence_id >= total {
            return Err(VerdictError::SequenceOutOfRange {
                candidate: sub.candidate,
                sequence_id: sub.sequence_id,
                total,
            });
        }
        if splitter::divisor_for(sub.sequence_id) != sub.divisor {
            return Err(VerdictError::DivisorMismatch {
                candidate: sub.candidate,
                sequence_id: sub.sequence_id,
                divisor: sub.divisor,
            });
        }
    }

    Ok(())
}

// ============================================================================
// Candidate board
// ============================================================================

/// What a verdict did to its candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Accepted; `remaining` divisors still outstanding
    Progress { remaining: u64 },

    /// Last outstanding divisor cleared, or a whole check returned prime
    Confirmed(Resolution),

    /// A divisor was found, or a whole check returned composite
    Rejected(Resolution),

    /// Sequence id already answered
    Duplicate,

    /// Candidate already resolved or never registered
    Stale,
}

#[derive(Debug)]
struct PendingCandidate {
    total: u64,
    /// One bit per sequence id
    answered: FixedBitSet,
    answered_count: u64,
    elapsed: Duration,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PendingCandidate {
    fn outstanding(&self) -> u64 {
        self.total - self.answered_count
    }
}

#[derive(Debug)]
enum CandidateState {
    Pending(PendingCandidate),
    Confirmed,
    Rejected,
}

/// Counters kept alongside the board
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoardCounters {
    pub confirmed: u64,
    pub rejected: u64,
    pub stale: u64,
    pub duplicate: u64,
    pub malformed: u64,
}

/// Per-candidate state, checked and set under one lock
#[derive(Debug)]
pub struct CandidateBoard {
    states: HashMap<u64, CandidateState>,
    resolved_order: VecDeque<u64>,
    retain_resolved: usize,
    pending: usize,
    counters: BoardCounters,
}

impl CandidateBoard {
    /// Create an empty board remembering up to `retain_resolved` resolved candidates
    pub fn new(retain_resolved: usize) -> Self {
        Self {
            states: HashMap::new(),
            resolved_order: VecDeque::new(),
            retain_resolved,
            pending: 0,
            counters: BoardCounters::default(),
        }
    }

    /// Start tracking `value` with `total` outstanding units
    ///
    /// The permit is held until the candidate resolves. A candidate with no
    /// units is confirmed on the spot and its resolution returned.
    pub fn register(
        &mut self,
        value: u64,
        total: u64,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Option<Resolution> {
        if self.states.contains_key(&value) {
            tracing::warn!(candidate = value, "Candidate registered twice; ignoring");
            return None;
        }

        if total == 0 {
            let resolution = Resolution::confirmed(value, Duration::ZERO);
            self.resolve(value, CandidateState::Confirmed);
            return Some(resolution);
        }

        self.states.insert(
            value,
            CandidateState::Pending(PendingCandidate {
                total,
                answered: FixedBitSet::with_capacity(total as usize),
                answered_count: 0,
                elapsed: Duration::ZERO,
                _permit: permit,
            }),
        );
        self.pending += 1;
        None
    }

    /// Fold a divisor verdict
    pub fn apply_division(&mut self, unit: &SubComputation) -> Result<Outcome, VerdictError> {
        let Some(divides) = unit.divides else {
            self.counters.malformed += 1;
            return Err(VerdictError::MissingVerdict {
                candidate: unit.candidate,
            });
        };

        let Some(CandidateState::Pending(pending)) = self.states.get_mut(&unit.candidate) else {
            self.counters.stale += 1;
            return Ok(Outcome::Stale);
        };

        if unit.sequence_id >= pending.total {
            self.counters.malformed += 1;
            return Err(VerdictError::SequenceOutOfRange {
                candidate: unit.candidate,
                sequence_id: unit.sequence_id,
                total: pending.total,
            });
        }

        if pending.answered.contains(unit.sequence_id as usize) {
            self.counters.duplicate += 1;
            return Ok(Outcome::Duplicate);
        }

        pending.elapsed += unit.elapsed;

        if divides {
            let resolution =
                Resolution::rejected(unit.candidate, pending.elapsed, Some(unit.divisor));
            self.resolve(unit.candidate, CandidateState::Rejected);
            return Ok(Outcome::Rejected(resolution));
        }

        pending.answered.insert(unit.sequence_id as usize);
        pending.answered_count += 1;
        match pending.outstanding() {
            0 => {
                let resolution = Resolution::confirmed(unit.candidate, pending.elapsed);
                self.resolve(unit.candidate, CandidateState::Confirmed);
                Ok(Outcome::Confirmed(resolution))
            }
            remaining => Ok(Outcome::Progress { remaining }),
        }
    }

    /// Fold a whole-candidate verdict
    pub fn apply_whole(&mut self, unit: &CandidateCheck) -> Result<Outcome, VerdictError> {
        let Some(is_prime) = unit.is_prime else {
            self.counters.malformed += 1;
            return Err(VerdictError::MissingVerdict {
                candidate: unit.value,
            });
        };

        let Some(CandidateState::Pending(pending)) = self.states.get_mut(&unit.value) else {
            self.counters.stale += 1;
            return Ok(Outcome::Stale);
        };

        let elapsed = pending.elapsed + unit.elapsed;
        if is_prime {
            self.resolve(unit.value, CandidateState::Confirmed);
            Ok(Outcome::Confirmed(Resolution::confirmed(unit.value, elapsed)))
        } else {
            self.resolve(unit.value, CandidateState::Rejected);
            Ok(Outcome::Rejected(Resolution::rejected(unit.value, elapsed, None)))
        }
    }

    /// Fold either kind of verdict
    pub fn apply(&mut self, unit: &WorkUnit) -> Result<Outcome, VerdictError> {
        match unit {
            WorkUnit::Division(sub) => self.apply_division(sub),
            WorkUnit::Whole(check) => self.apply_whole(check),
        }
    }

    /// Whether `value` is still waiting for verdicts
    pub fn is_pending(&self, value: u64) -> bool {
        matches!(self.states.get(&value), Some(CandidateState::Pending(_)))
    }

    /// Whether the unit behind `key` is still worth handing out
    pub fn is_live(&self, key: UnitKey) -> bool {
        match self.states.get(&key.candidate) {
            Some(CandidateState::Pending(p)) => !p.answered.contains(key.sequence_id as usize),
            _ => false,
        }
    }

    /// Outstanding units of a pending candidate
    pub fn outstanding(&self, value: u64) -> Option<u64> {
        match self.states.get(&value) {
            Some(CandidateState::Pending(p)) => Some(p.outstanding()),
            _ => None,
        }
    }

    /// Number of pending candidates
    pub fn pending_count(&self) -> usize {
        self.pending
    }

    /// Counter snapshot
    pub fn counters(&self) -> BoardCounters {
        self.counters
    }

    /// Count a verdict rejected before reaching the board
    pub fn record_malformed(&mut self) {
        self.counters.malformed += 1;
    }

    fn resolve(&mut self, value: u64, state: CandidateState) {
        match state {
            CandidateState::Confirmed => self.counters.confirmed += 1,
            CandidateState::Rejected => self.counters.rejected += 1,
            CandidateState::Pending(_) => return,
        }

        // dropping the pending state releases its window permit
        if let Some(CandidateState::Pending(_)) = self.states.insert(value, state) {
            self.pending -= 1;
        }

        self.resolved_order.push_back(value);
        while self.resolved_order.len() > self.retain_resolved {
            if let Some(old) = self.resolved_order.pop_front() {
                self.states.remove(&old);
            }
        }
    }
}

impl Default for CandidateBoard {
    fn default() -> Self {
        Self::new(DEFAULT_RETAIN_RESOLVED)
    }
}

/// Board shared between the dispatcher, the feeder and the aggregator
#[derive(Debug, Clone, Default)]
pub struct SharedBoard(Arc<Mutex<CandidateBoard>>);

impl SharedBoard {
    /// Wrap a board
    pub fn new(board: CandidateBoard) -> Self {
        Self(Arc::new(Mutex::new(board)))
    }

    /// Lock the board
    ///
    /// Board operations never leave it half-updated, so a poisoned lock is
    /// recovered rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, CandidateBoard> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Aggregator task
// ============================================================================

/// Consumes verdicts and routes resolutions to the sinks
pub struct ResultAggregator {
    board: SharedBoard,
    confirmed_tx: mpsc::Sender<Resolution>,
    rejected_tx: mpsc::Sender<Resolution>,
}

impl ResultAggregator {
    /// Create a new aggregator
    pub fn new(
        board: SharedBoard,
        confirmed_tx: mpsc::Sender<Resolution>,
        rejected_tx: mpsc::Sender<Resolution>,
    ) -> Self {
        Self {
            board,
            confirmed_tx,
            rejected_tx,
        }
    }

    /// Run until shutdown, or until the feeder is exhausted and nothing is pending
    ///
    /// Returning drops the resolution senders, which lets the sinks drain and stop.
    pub async fn run(
        self,
        mut verdicts: mpsc::Receiver<WorkUnit>,
        mut exhausted: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut watch_exhausted = true;

        loop {
            let done_feeding = *exhausted.borrow();
            let idle = self.board.lock().pending_count() == 0;
            if done_feeding && idle {
                tracing::info!("All candidates resolved");
                break;
            }

            tokio::select! {
                verdict = verdicts.recv() => match verdict {
                    Some(unit) => {
                        if !self.fold(&unit).await {
                            break;
                        }
                    }
                    None => break,
                },
                changed = exhausted.changed(), if watch_exhausted => {
                    // feeder gone without finishing; only shutdown ends the loop now
                    watch_exhausted = changed.is_ok();
                }
                _ = shutdown.changed() => {
                    tracing::debug!("Aggregator stopping on shutdown");
                    break;
                }
            }
        }
    }

    /// Fold one verdict; returns false once the sinks are gone
    async fn fold(&self, unit: &WorkUnit) -> bool {
        let outcome = self.board.lock().apply(unit);

        match outcome {
            Ok(Outcome::Progress { remaining }) => {
                tracing::trace!(candidate = unit.candidate(), remaining, "Verdict accepted");
                true
            }
            Ok(Outcome::Confirmed(resolution)) => {
                metrics::record_resolution("confirmed");
                self.confirmed_tx.send(resolution).await.is_ok()
            }
            Ok(Outcome::Rejected(resolution)) => {
                metrics::record_resolution("rejected");
                self.rejected_tx.send(resolution).await.is_ok()
            }
            Ok(Outcome::Duplicate) => {
                metrics::record_anomaly("duplicate");
                tracing::warn!(key = ?unit.key(), "Duplicate verdict ignored");
                true
            }
            Ok(Outcome::Stale) => {
                metrics::record_anomaly("stale");
                tracing::debug!(candidate = unit.candidate(), "Late verdict for resolved candidate");
                true
            }
            Err(e) => {
                metrics::record_anomaly("malformed");
                tracing::warn!(error = %e, "Dropping malformed verdict");
                true
            }
        }
    }
}
