// Core data structures for the prime dispatcher and its workers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::primes::{divides, is_prime};

/// How the dispatcher hands out work
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One divisor check per unit ("heavy" mode)
    #[default]
    Split,
    /// One whole candidate per unit ("simple" mode)
    Whole,
}

impl DispatchMode {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Whole => "whole",
        }
    }

    /// Create from string (accepts the legacy heavy/simple names)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "split" | "heavy" => Some(Self::Split),
            "whole" | "simple" => Some(Self::Whole),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one unit of work within its candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub candidate: u64,
    pub sequence_id: u64,
}

/// One divisibility check derived from a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubComputation {
    /// Candidate under test
    pub candidate: u64,

    /// Trial divisor
    pub divisor: u64,

    /// Zero-based index within the candidate's split
    pub sequence_id: u64,

    /// Random correlation token
    pub token: Uuid,

    /// `Some(true)` when `divisor` evenly divides `candidate` (candidate is composite)
    #[serde(default)]
    pub divides: Option<bool>,

    /// Time the worker spent evaluating
    #[serde(default)]
    pub elapsed: Duration,
}

impl SubComputation {
    /// Create an unanswered unit
    pub fn new(candidate: u64, divisor: u64, sequence_id: u64, token: Uuid) -> Self {
        Self {
            candidate,
            divisor,
            sequence_id,
            token,
            divides: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Key of this unit
    pub fn key(&self) -> UnitKey {
        UnitKey {
            candidate: self.candidate,
            sequence_id: self.sequence_id,
        }
    }

    /// Record a verdict
    pub fn with_verdict(mut self, divides: bool, elapsed: Duration) -> Self {
        self.divides = Some(divides);
        self.elapsed = elapsed;
        self
    }
}

/// A whole candidate handed to one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCheck {
    /// Candidate under test
    pub value: u64,

    /// `Some(true)` when the worker found the candidate prime
    #[serde(default)]
    pub is_prime: Option<bool>,

    /// Time the worker spent evaluating
    #[serde(default)]
    pub elapsed: Duration,
}

impl CandidateCheck {
    /// Create an unanswered check
    pub fn new(value: u64) -> Self {
        Self {
            value,
            is_prime: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Key of this unit; whole candidates are always sequence 0
    pub fn key(&self) -> UnitKey {
        UnitKey {
            candidate: self.value,
            sequence_id: 0,
        }
    }

    /// Record a verdict
    pub fn with_verdict(mut self, is_prime: bool, elapsed: Duration) -> Self {
        self.is_prime = Some(is_prime);
        self.elapsed = elapsed;
        self
    }
}

/// Either kind of unit, travelling to a worker or back with a verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    Division(SubComputation),
    Whole(CandidateCheck),
}

impl WorkUnit {
    /// Candidate this unit belongs to
    pub fn candidate(&self) -> u64 {
        match self {
            Self::Division(s) => s.candidate,
            Self::Whole(c) => c.value,
        }
    }

    /// Key of this unit
    pub fn key(&self) -> UnitKey {
        match self {
            Self::Division(s) => s.key(),
            Self::Whole(c) => c.key(),
        }
    }

    /// Dispatch mode this unit belongs to
    pub fn mode(&self) -> DispatchMode {
        match self {
            Self::Division(_) => DispatchMode::Split,
            Self::Whole(_) => DispatchMode::Whole,
        }
    }

    /// Whether the verdict field has been filled in
    pub fn has_verdict(&self) -> bool {
        match self {
            Self::Division(s) => s.divides.is_some(),
            Self::Whole(c) => c.is_prime.is_some(),
        }
    }

    /// Evaluate the unit and record the verdict with its elapsed time
    pub fn evaluate(self) -> Self {
        let start = std::time::Instant::now();
        match self {
            Self::Division(s) => {
                let found = divides(s.candidate, s.divisor);
                Self::Division(s.with_verdict(found, start.elapsed()))
            }
            Self::Whole(c) => {
                let prime = is_prime(c.value);
                Self::Whole(c.with_verdict(prime, start.elapsed()))
            }
        }
    }
}

/// A confirmed prime with its assigned sequential id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeRecord {
    /// Approximate sequential id (rounded to the flush granularity)
    pub id: u64,

    /// The prime
    pub value: u64,

    /// Total evaluation time across all of the candidate's units
    pub elapsed: Duration,
}

/// Final disposition of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Candidate value
    pub value: u64,

    /// Accumulated evaluation time
    pub elapsed: Duration,

    /// Divisor that rejected the candidate (split mode only)
    pub divisor: Option<u64>,
}

impl Resolution {
    /// Resolution of a prime candidate
    pub fn confirmed(value: u64, elapsed: Duration) -> Self {
        Self {
            value,
            elapsed,
            divisor: None,
        }
    }

    /// Resolution of a composite candidate
    pub fn rejected(value: u64, elapsed: Duration, divisor: Option<u64>) -> Self {
        Self {
            value,
            elapsed,
            divisor,
        }
    }
}
