//! Sharded append-only prime ledger
//!
//! Confirmed primes are buffered in memory and flushed, sorted, into shard files
//! named `<start>-<end>.txt` under the base directory. `directory.txt` lists the
//! shard names in creation order and is the source of truth for resuming.
//!
//! - [`directory`] - the directory index file
//! - [`engine`] - buffer, flush, rollover and the persistent counters

pub mod directory;
pub mod engine;

pub use directory::DirectoryIndex;
pub use engine::{AppendOutcome, FlushReport, StorageEngine};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension of shard files
pub const SHARD_EXTENSION: &str = "txt";

/// Errors raised by the prime ledger
///
/// Every variant is fatal for the process that owns the ledger.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Base directory could not be created
    #[error("Failed to create ledger directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A ledger file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A ledger file could not be written
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A shard line is not a decimal integer
    #[error("Corrupt line in {path}: {line:?}")]
    Corrupt { path: PathBuf, line: String },

    /// Shard and buffer sizes cannot drive rollover
    #[error("Invalid ledger sizes for {path}: {reason}")]
    InvalidSizes { path: PathBuf, reason: String },
}

impl StorageError {
    /// Path of the file or directory involved
    pub fn path(&self) -> &Path {
        match self {
            Self::CreateDirectory { path, .. }
            | Self::Read { path, .. }
            | Self::Write { path, .. }
            | Self::Corrupt { path, .. }
            | Self::InvalidSizes { path, .. } => path,
        }
    }
}

/// Name of the shard starting at `start`
#[must_use]
pub fn shard_name(start: u64, max_shard_size: u64) -> String {
    format!("{start}-{}", start.saturating_add(max_shard_size))
}

/// Path of the shard file for a directory entry
#[must_use]
pub fn shard_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join(format!("{name}.{SHARD_EXTENSION}"))
}

/// Round `value` to the nearest multiple of `unit` (halves round up)
#[must_use]
pub fn round_to_multiple(value: u64, unit: u64) -> u64 {
    if unit == 0 {
        return value;
    }
    let quotient = value / unit;
    let remainder = value % unit;
    if remainder * 2 >= unit {
        (quotient + 1) * unit
    } else {
        quotient * unit
    }
}
