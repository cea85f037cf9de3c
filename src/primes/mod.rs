//! Candidate generation and the primality contract
//!
//! - [`primality`] - `is_prime`, `integer_sqrt`, `divides`
//! - [`sequencer`] - odd candidates after the resume point
//! - [`splitter`] - per-candidate divisor fan-out

pub mod primality;
pub mod sequencer;
pub mod splitter;

pub use primality::{divides, integer_sqrt, is_prime};
pub use sequencer::CandidateSequencer;
