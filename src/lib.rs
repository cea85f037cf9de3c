//! primedist - distributed prime generation
//!
//! A dispatcher hands odd candidates to HTTP workers, either whole or split into
//! one trial-division unit per divisor, folds the returned verdicts and appends
//! every confirmed prime to a sharded, append-only ledger on disk.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`primes`] - Primality test, candidate sequencer and divisor splitter
//! - [`coordinator`] - Dispatch engine, result aggregation and the HTTP surface
//! - [`worker`] - Worker pool that evaluates units from a work source
//! - [`local`] - In-process generation without HTTP
//! - [`storage`] - Sharded prime ledger
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use primedist::config::Config;
//! use primedist::local::run_local;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let summary = run_local(&config, Some(10_000)).await?;
//!     println!("last prime: {}", summary.last_prime);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod local;
pub mod metrics;
pub mod models;
pub mod primes;
pub mod storage;
pub mod utils;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{CoordinatorClient, CoordinatorServer, DispatchEngine};
    pub use crate::error::{Error, ErrorCategory, PrimedistErrorTrait, Result};
    pub use crate::models::{CandidateCheck, DispatchMode, SubComputation, WorkUnit};
    pub use crate::storage::StorageEngine;
    pub use crate::worker::{WorkSource, WorkerRunner};
}

// Direct re-exports for convenience
pub use models::{CandidateCheck, DispatchMode, PrimeRecord, SubComputation, WorkUnit};
