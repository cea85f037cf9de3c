//! Candidate sequencer
//!
//! Produces the ordered stream of odd integers to test, starting right after the
//! last persisted prime.

/// Smallest candidate ever produced; 2 is never generated.
pub const FIRST_CANDIDATE: u64 = 3;

/// Iterator over odd candidates
#[derive(Debug, Clone)]
pub struct CandidateSequencer {
    next: Option<u64>,
    limit: Option<u64>,
}

impl CandidateSequencer {
    /// Start after `last_prime`
    ///
    /// An odd resume point continues at `last_prime + 2`, an even one at
    /// `last_prime + 1`. Nothing below 3 is produced.
    pub fn resume_after(last_prime: u64) -> Self {
        let start = if last_prime % 2 == 0 {
            last_prime.checked_add(1)
        } else {
            last_prime.checked_add(2)
        }
        .map(|s| s.max(FIRST_CANDIDATE));

        Self {
            next: start,
            limit: None,
        }
    }

    /// Stop before reaching `limit` (exclusive)
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The candidate the next call to `next()` returns
    pub fn peek(&self) -> Option<u64> {
        self.next.filter(|n| self.limit.map_or(true, |limit| *n < limit))
    }
}

impl Iterator for CandidateSequencer {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.peek()?;
        self.next = current.checked_add(2);
        Some(current)
    }
}
