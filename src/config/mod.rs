//! Configuration management for primedist
//!
//! This module handles loading and validating configuration from environment variables,
//! files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::DispatchMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Prime ledger configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Dispatcher (server) configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Worker (client) configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prime ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `directory.txt` and the shard files
    pub base_dir: PathBuf,

    /// Resume point used when the ledger is empty
    pub starting_prime: u64,

    /// Primes per shard file
    pub max_shard_size: u64,

    /// Primes buffered in memory before a flush
    pub max_buffer_size: u64,
}

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Address the HTTP server binds to
    pub bind_address: String,

    /// Which kind of unit is handed out
    pub mode: DispatchMode,

    /// Capacity of the pending-unit queue
    pub queue_capacity: usize,

    /// Candidates resolved concurrently in split mode
    pub max_in_flight_candidates: usize,

    /// Seconds before an unanswered unit is handed out again (0 disables)
    pub lease_timeout_secs: u64,

    /// Print rejected candidates alongside confirmed primes
    pub show_rejections: bool,

    /// Attach the HTTP trace layer
    pub enable_request_logging: bool,
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Base URL of the dispatcher
    pub coordinator_url: String,

    /// Which endpoint pair to poll
    pub mode: DispatchMode,

    /// Units evaluated concurrently
    pub concurrency: usize,

    /// Fixed backoff between failed polls or reports, in milliseconds
    pub retry_delay_ms: u64,

    /// Timeout for report requests, in seconds
    pub request_timeout_secs: u64,

    /// Timeout for long-poll requests, in seconds
    pub poll_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let base_dir = std::env::var("PRIMEDIST_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.base_dir);

        let starting_prime = env_parse("PRIMEDIST_STARTING_PRIME")
            .unwrap_or(defaults.storage.starting_prime);

        let max_shard_size = env_parse("PRIMEDIST_MAX_SHARD_SIZE")
            .unwrap_or(defaults.storage.max_shard_size);

        let max_buffer_size = env_parse("PRIMEDIST_MAX_BUFFER_SIZE")
            .unwrap_or(defaults.storage.max_buffer_size);

        let bind_address = std::env::var("PRIMEDIST_BIND_ADDRESS")
            .unwrap_or(defaults.dispatcher.bind_address);

        let mode = std::env::var("PRIMEDIST_MODE")
            .ok()
            .and_then(|v| DispatchMode::parse(&v))
            .unwrap_or_default();

        let queue_capacity = env_parse("PRIMEDIST_QUEUE_CAPACITY")
            .unwrap_or(defaults.dispatcher.queue_capacity);

        let max_in_flight_candidates = env_parse("PRIMEDIST_MAX_IN_FLIGHT")
            .unwrap_or(defaults.dispatcher.max_in_flight_candidates);

        let lease_timeout_secs = env_parse("PRIMEDIST_LEASE_TIMEOUT")
            .unwrap_or(defaults.dispatcher.lease_timeout_secs);

        let show_rejections = env_parse("PRIMEDIST_SHOW_REJECTIONS")
            .unwrap_or(defaults.dispatcher.show_rejections);

        let coordinator_url = std::env::var("PRIMEDIST_COORDINATOR_URL")
            .unwrap_or(defaults.worker.coordinator_url);

        let concurrency = env_parse("PRIMEDIST_CONCURRENCY").unwrap_or(defaults.worker.concurrency);

        let retry_delay_ms = env_parse("PRIMEDIST_RETRY_DELAY_MS")
            .unwrap_or(defaults.worker.retry_delay_ms);

        let request_timeout_secs = env_parse("PRIMEDIST_REQUEST_TIMEOUT")
            .unwrap_or(defaults.worker.request_timeout_secs);

        let poll_timeout_secs = env_parse("PRIMEDIST_POLL_TIMEOUT")
            .unwrap_or(defaults.worker.poll_timeout_secs);

        let log_level =
            std::env::var("PRIMEDIST_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let log_format =
            std::env::var("PRIMEDIST_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            storage: StorageConfig {
                base_dir,
                starting_prime,
                max_shard_size,
                max_buffer_size,
            },
            dispatcher: DispatcherConfig {
                bind_address,
                mode,
                queue_capacity,
                max_in_flight_candidates,
                lease_timeout_secs,
                show_rejections,
                enable_request_logging: defaults.dispatcher.enable_request_logging,
            },
            worker: WorkerConfig {
                coordinator_url,
                mode,
                concurrency,
                retry_delay_ms,
                request_timeout_secs,
                poll_timeout_secs,
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_buffer_size == 0 {
            anyhow::bail!("max_buffer_size must be greater than 0");
        }

        if self.storage.max_shard_size == 0 {
            anyhow::bail!("max_shard_size must be greater than 0");
        }

        if self.storage.max_shard_size % self.storage.max_buffer_size != 0 {
            anyhow::bail!("max_shard_size must be a multiple of max_buffer_size");
        }

        if self.dispatcher.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.dispatcher.max_in_flight_candidates == 0 {
            anyhow::bail!("max_in_flight_candidates must be greater than 0");
        }

        if self.worker.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.worker.request_timeout_secs == 0 || self.worker.poll_timeout_secs == 0 {
            anyhow::bail!("worker timeouts must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Get lease timeout as Duration, `None` when re-dispatch is disabled
    #[must_use]
    pub fn lease_timeout(&self) -> Option<Duration> {
        match self.dispatcher.lease_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".primes")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            starting_prime: 1,
            max_shard_size: 10_000_000,
            max_buffer_size: 300,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0:8080"),
            mode: DispatchMode::Split,
            queue_capacity: 100,
            max_in_flight_candidates: 1,
            lease_timeout_secs: 60,
            show_rejections: false,
            enable_request_logging: true,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: String::from("http://127.0.0.1:8080"),
            mode: DispatchMode::Split,
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            retry_delay_ms: 1000,
            request_timeout_secs: 10,
            poll_timeout_secs: 300,
        }
    }
}

impl WorkerConfig {
    /// Fixed retry backoff as Duration
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
