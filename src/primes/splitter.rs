//! Divisor splitter
//!
//! Decomposes "is `n` prime?" into independent divisibility checks, one per odd
//! trial divisor in the closed range `[3, ⌊√n⌋]`. The upper bound is inclusive so
//! that squares of primes (9, 25, 49, ...) are rejected by their root.

use uuid::Uuid;

use super::primality::integer_sqrt;
use crate::models::SubComputation;

/// Smallest trial divisor
const FIRST_DIVISOR: u64 = 3;

/// Number of sub-computations `split(candidate)` yields
#[must_use]
pub fn count(candidate: u64) -> u64 {
    let root = integer_sqrt(candidate);
    if root < FIRST_DIVISOR {
        0
    } else {
        (root - FIRST_DIVISOR) / 2 + 1
    }
}

/// Trial divisor carried by the unit with `sequence_id`
#[must_use]
pub fn divisor_for(sequence_id: u64) -> u64 {
    sequence_id.saturating_mul(2).saturating_add(FIRST_DIVISOR)
}

/// Lazily enumerate the sub-computations for `candidate`
///
/// Each unit carries a zero-based sequence id and a fresh correlation token.
/// Candidates below 9 yield nothing and are trivially prime.
pub fn split(candidate: u64) -> Split {
    Split {
        candidate,
        next_sequence: 0,
        total: count(candidate),
    }
}

/// Iterator returned by [`split`]
#[derive(Debug, Clone)]
pub struct Split {
    candidate: u64,
    next_sequence: u64,
    total: u64,
}

impl Split {
    /// Candidate being split
    pub fn candidate(&self) -> u64 {
        self.candidate
    }

    /// Total number of units this split produces
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Iterator for Split {
    type Item = SubComputation;

    fn next(&mut self) -> Option<SubComputation> {
        if self.next_sequence >= self.total {
            return None;
        }

        let sequence_id = self.next_sequence;
        self.next_sequence += 1;

        Some(SubComputation::new(
            self.candidate,
            divisor_for(sequence_id),
            sequence_id,
            Uuid::new_v4(),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.next_sequence) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Split {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn divisors(candidate: u64) -> Vec<u64> {
        split(candidate).map(|s| s.divisor).collect()
    }

    #[test]
    fn test_small_candidates_have_no_units() {
        for n in [1, 3, 5, 7] {
            assert_eq!(count(n), 0, "candidate {n}");
            assert!(divisors(n).is_empty());
        }
    }

    #[test]
    fn test_upper_bound_is_inclusive() {
        assert_eq!(divisors(9), vec![3]);
        assert_eq!(divisors(15), vec![3]);
        assert_eq!(divisors(25), vec![3, 5]);
        assert_eq!(divisors(49), vec![3, 5, 7]);
    }

    #[test]
    fn test_sequence_ids_and_tokens() {
        let units: Vec<_> = split(10_001).collect();
        assert_eq!(units.len() as u64, count(10_001));

        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.sequence_id, i as u64);
            assert_eq!(unit.candidate, 10_001);
            assert!(unit.divides.is_none());
        }

        let tokens: HashSet<_> = units.iter().map(|u| u.token).collect();
        assert_eq!(tokens.len(), units.len());
    }

    #[test]
    fn test_exact_size() {
        let mut it = split(101);
        assert_eq!(it.len(), 4); // 3, 5, 7, 9
        it.next();
        assert_eq!(it.len(), 3);
        assert_eq!(it.total(), 4);
    }
}
