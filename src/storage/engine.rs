//! Storage engine
//!
//! Owns the append buffer and the persistent counters. All mutation goes through
//! one async lock; only a flush touches shard files.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::{round_to_multiple, shard_name, shard_path, DirectoryIndex, StorageError};
use crate::config::StorageConfig;
use crate::metrics;
use crate::models::PrimeRecord;

/// Delay before the single directory-creation retry
const CREATE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Result of one flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Shard the values were appended to
    pub shard: String,

    /// Number of values written
    pub written: usize,

    /// Largest value written
    pub largest: u64,

    /// Counter value after the flush
    pub last_assigned_id: u64,
}

/// Result of [`StorageEngine::append`]
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// The buffered record
    pub record: PrimeRecord,

    /// Set when the append filled the buffer and triggered a flush
    pub flushed: Option<FlushReport>,
}

/// Mutable ledger state guarded by the engine lock
#[derive(Debug)]
struct LedgerState {
    buffer: Vec<PrimeRecord>,
    last_assigned_id: u64,
    last_prime: u64,
}

/// Sharded append-only prime ledger
#[derive(Debug)]
pub struct StorageEngine {
    config: StorageConfig,
    index: DirectoryIndex,
    state: Mutex<LedgerState>,
}

impl StorageEngine {
    /// Open (or initialise) the ledger at `config.base_dir`
    ///
    /// Creates the directory and index if needed, then derives the rounded id
    /// counter and the resume point from what is already on disk. Both sizes must
    /// be non-zero and the shard size a multiple of the buffer size.
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        check_sizes(&config)?;
        create_base_dir(&config.base_dir)?;

        let index = DirectoryIndex::new(&config.base_dir);
        index.ensure_exists()?;

        let total = count_lines(&config.base_dir, &index)?;
        let last_assigned_id = round_to_multiple(total, config.max_buffer_size);
        let last_prime = read_resume_point(&config, &index)?;

        tracing::info!(
            base_dir = %config.base_dir.display(),
            stored = total,
            last_assigned_id,
            last_prime,
            "Prime ledger opened"
        );

        Ok(Self {
            config,
            index,
            state: Mutex::new(LedgerState {
                buffer: Vec::new(),
                last_assigned_id,
                last_prime,
            }),
        })
    }

    /// Ledger configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Base directory of the ledger
    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// Buffer a confirmed prime, flushing when the buffer is full
    pub async fn append(
        &self,
        value: u64,
        elapsed: Duration,
    ) -> Result<AppendOutcome, StorageError> {
        let mut state = self.state.lock().await;

        let record = PrimeRecord {
            id: state.last_assigned_id + state.buffer.len() as u64,
            value,
            elapsed,
        };
        state.buffer.push(record);

        let flushed = if state.buffer.len() as u64 >= self.config.max_buffer_size {
            self.flush_locked(&mut state)?
        } else {
            None
        };

        Ok(AppendOutcome { record, flushed })
    }

    /// Flush whatever is buffered, even a partial buffer
    pub async fn flush(&self) -> Result<Option<FlushReport>, StorageError> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state)
    }

    /// Resume point read back from disk
    pub async fn resume_point(&self) -> Result<u64, StorageError> {
        let _state = self.state.lock().await;
        read_resume_point(&self.config, &self.index)
    }

    /// Number of primes stored across all indexed shards
    pub async fn total_prime_count(&self) -> Result<u64, StorageError> {
        let _state = self.state.lock().await;
        count_lines(&self.config.base_dir, &self.index)
    }

    /// Stored prime count rounded to the flush granularity
    pub async fn current_id(&self) -> Result<u64, StorageError> {
        let total = self.total_prime_count().await?;
        Ok(round_to_multiple(total, self.config.max_buffer_size))
    }

    /// Current value of the rounded id counter
    pub async fn last_assigned_id(&self) -> u64 {
        self.state.lock().await.last_assigned_id
    }

    /// Largest prime flushed so far (or the resume point)
    pub async fn last_prime(&self) -> u64 {
        self.state.lock().await.last_prime
    }

    /// Number of records waiting for the next flush
    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    /// Shard names in creation order
    pub async fn shards(&self) -> Result<Vec<String>, StorageError> {
        let _state = self.state.lock().await;
        self.index.entries()
    }

    fn flush_locked(&self, state: &mut LedgerState) -> Result<Option<FlushReport>, StorageError> {
        if state.buffer.is_empty() {
            return Ok(None);
        }

        let start = Instant::now();
        state.buffer.sort_unstable_by_key(|r| r.value);

        let shard = self.active_shard(state.last_assigned_id)?;
        let path = shard_path(&self.config.base_dir, &shard);
        write_values(&path, state.buffer.iter().map(|r| r.value))?;

        let written = state.buffer.len();
        let largest = state.buffer.last().map_or(0, |r| r.value);
        state.buffer.clear();
        state.last_assigned_id += self.config.max_buffer_size;
        state.last_prime = state.last_prime.max(largest);

        metrics::record_flush(written, start.elapsed().as_secs_f64());
        tracing::debug!(
            shard = %shard,
            written,
            largest,
            last_assigned_id = state.last_assigned_id,
            "Flushed prime buffer"
        );

        Ok(Some(FlushReport {
            shard,
            written,
            largest,
            last_assigned_id: state.last_assigned_id,
        }))
    }

    /// Pick the shard for a flush starting at counter value `id`
    ///
    /// A new name is recorded in the index before its file is created.
    fn active_shard(&self, id: u64) -> Result<String, StorageError> {
        let size = self.config.max_shard_size;
        let last = self.index.last_entry()?;

        match last {
            Some(name) if id % size != 0 => Ok(name),
            last => {
                let name = shard_name(id - id % size, size);
                if last.as_deref() != Some(name.as_str()) {
                    self.index.append(&name)?;
                    tracing::info!(shard = %name, "Started new shard");
                }
                Ok(name)
            }
        }
    }
}

fn check_sizes(config: &StorageConfig) -> Result<(), StorageError> {
    let reason = if config.max_buffer_size == 0 {
        "max_buffer_size must be greater than 0"
    } else if config.max_shard_size == 0 {
        "max_shard_size must be greater than 0"
    } else if config.max_shard_size % config.max_buffer_size != 0 {
        "max_shard_size must be a multiple of max_buffer_size"
    } else {
        return Ok(());
    };

    Err(StorageError::InvalidSizes {
        path: config.base_dir.clone(),
        reason: reason.to_string(),
    })
}

fn create_base_dir(path: &Path) -> Result<(), StorageError> {
    if let Err(first) = fs::create_dir_all(path) {
        tracing::warn!(path = %path.display(), error = %first, "Retrying ledger directory creation");
        std::thread::sleep(CREATE_RETRY_DELAY);
        fs::create_dir_all(path).map_err(|source| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn write_values(path: &Path, values: impl Iterator<Item = u64>) -> Result<(), StorageError> {
    let to_write_error = |source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_write_error)?;

    let mut writer = BufWriter::new(file);
    for value in values {
        writeln!(writer, "{value}").map_err(to_write_error)?;
    }
    writer.flush().map_err(to_write_error)?;
    writer.get_ref().sync_data().map_err(to_write_error)
}

/// Read a shard, treating a missing file as empty
fn read_shard(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn count_lines(base_dir: &Path, index: &DirectoryIndex) -> Result<u64, StorageError> {
    let mut total = 0u64;
    for name in index.entries()? {
        if let Some(content) = read_shard(&shard_path(base_dir, &name))? {
            total += content.lines().filter(|l| !l.trim().is_empty()).count() as u64;
        }
    }
    Ok(total)
}

fn read_resume_point(config: &StorageConfig, index: &DirectoryIndex) -> Result<u64, StorageError> {
    let Some(name) = index.last_entry()? else {
        return Ok(config.starting_prime);
    };

    let path = shard_path(&config.base_dir, &name);
    let Some(content) = read_shard(&path)? else {
        return Ok(config.starting_prime);
    };

    let last = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last();

    match last {
        None | Some("0") => Ok(config.starting_prime),
        Some(line) => line.parse::<u64>().map_err(|_| StorageError::Corrupt {
            path,
            line: line.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, buffer: u64, shard: u64) -> StorageConfig {
        StorageConfig {
            base_dir: dir.path().to_path_buf(),
            starting_prime: 1,
            max_shard_size: shard,
            max_buffer_size: buffer,
        }
    }

    #[tokio::test]
    async fn test_open_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(test_config(&dir, 3, 9)).unwrap();

        assert!(dir.path().join(DirectoryIndex::FILE_NAME).exists());
        assert_eq!(engine.last_assigned_id().await, 0);
        assert_eq!(engine.resume_point().await.unwrap(), 1);
        assert!(engine.shards().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_creates_nested_directory() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, 3, 9);
        config.base_dir = dir.path().join("a").join("b");

        StorageEngine::open(config).unwrap();
        assert!(dir.path().join("a/b/directory.txt").exists());
    }

    #[tokio::test]
    async fn test_flush_sorts_and_advances_counter() {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(test_config(&dir, 3, 9)).unwrap();

        assert!(engine.append(7, Duration::ZERO).await.unwrap().flushed.is_none());
        assert!(engine.append(3, Duration::ZERO).await.unwrap().flushed.is_none());
        let outcome = engine.append(5, Duration::ZERO).await.unwrap();
        assert_eq!(outcome.record.id, 2);

        let report = outcome.flushed.unwrap();
        assert_eq!(report.shard, "0-9");
        assert_eq!(report.written, 3);
        assert_eq!(report.largest, 7);
        assert_eq!(report.last_assigned_id, 3);

        let content = fs::read_to_string(dir.path().join("0-9.txt")).unwrap();
        assert_eq!(content, "3\n5\n7\n");
        assert_eq!(engine.last_prime().await, 7);
    }

    #[tokio::test]
    async fn test_partial_flush_advances_by_buffer_size() {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(test_config(&dir, 3, 9)).unwrap();

        engine.append(11, Duration::ZERO).await.unwrap();
        let report = engine.flush().await.unwrap().unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(engine.last_assigned_id().await, 3);

        assert!(engine.flush().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shard_rollover() {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(test_config(&dir, 2, 4)).unwrap();

        for value in [3, 5, 7, 11] {
            engine.append(value, Duration::ZERO).await.unwrap();
        }
        assert_eq!(engine.shards().await.unwrap(), vec!["0-4"]);

        let outcome = engine.append(13, Duration::ZERO).await.unwrap();
        assert!(outcome.flushed.is_none());
        let report = engine.append(17, Duration::ZERO).await.unwrap().flushed.unwrap();
        assert_eq!(report.shard, "4-8");

        assert_eq!(engine.shards().await.unwrap(), vec!["0-4", "4-8"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("0-4.txt")).unwrap(),
            "3\n5\n7\n11\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("4-8.txt")).unwrap(),
            "13\n17\n"
        );
    }

    #[tokio::test]
    async fn test_reopen_resumes() {
        let dir = TempDir::new().unwrap();
        {
            let engine = StorageEngine::open(test_config(&dir, 2, 4)).unwrap();
            for value in [3, 5, 7] {
                engine.append(value, Duration::ZERO).await.unwrap();
            }
            engine.flush().await.unwrap();
        }

        let engine = StorageEngine::open(test_config(&dir, 2, 4)).unwrap();
        // three lines round to four
        assert_eq!(engine.last_assigned_id().await, 4);
        assert_eq!(engine.total_prime_count().await.unwrap(), 3);
        assert_eq!(engine.current_id().await.unwrap(), 4);
        assert_eq!(engine.resume_point().await.unwrap(), 7);
        assert_eq!(engine.last_prime().await, 7);
    }

    #[tokio::test]
    async fn test_missing_shard_is_recreated() {
        let dir = TempDir::new().unwrap();
        let index = DirectoryIndex::new(dir.path());
        index.ensure_exists().unwrap();
        index.append("0-4").unwrap();

        let engine = StorageEngine::open(test_config(&dir, 2, 4)).unwrap();
        assert_eq!(engine.resume_point().await.unwrap(), 1);

        engine.append(3, Duration::ZERO).await.unwrap();
        engine.append(5, Duration::ZERO).await.unwrap();

        assert_eq!(engine.shards().await.unwrap(), vec!["0-4"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("0-4.txt")).unwrap(),
            "3\n5\n"
        );
    }

    #[tokio::test]
    async fn test_zero_resume_point_falls_back() {
        let dir = TempDir::new().unwrap();
        let index = DirectoryIndex::new(dir.path());
        index.append("0-4").unwrap();
        fs::write(dir.path().join("0-4.txt"), "0\n").unwrap();

        let mut config = test_config(&dir, 2, 4);
        config.starting_prime = 101;
        let engine = StorageEngine::open(config).unwrap();
        assert_eq!(engine.resume_point().await.unwrap(), 101);
    }

    #[tokio::test]
    async fn test_corrupt_shard_line() {
        let dir = TempDir::new().unwrap();
        let index = DirectoryIndex::new(dir.path());
        index.append("0-4").unwrap();
        fs::write(dir.path().join("0-4.txt"), "3\nabc\n").unwrap();

        let err = StorageEngine::open(test_config(&dir, 2, 4)).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_open_rejects_unusable_sizes() {
        let dir = TempDir::new().unwrap();

        for (buffer, shard) in [(0, 9), (3, 0), (3, 10)] {
            let err = StorageEngine::open(test_config(&dir, buffer, shard)).unwrap_err();
            assert!(matches!(err, StorageError::InvalidSizes { .. }), "{buffer}/{shard}");
        }
        assert!(!dir.path().join(DirectoryIndex::FILE_NAME).exists());
    }
}
