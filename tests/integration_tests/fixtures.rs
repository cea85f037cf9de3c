//! Shared fixtures for integration tests

use std::path::Path;
use std::sync::Arc;

use primedist::coordinator::CoordinatorConfig;
use primedist::models::DispatchMode;
use primedist::storage::StorageEngine;

use crate::common::ledger_config;

/// Odd composites whose smallest factor is the last divisor of their split
pub const SQUARES_OF_PRIMES: &[u64] = &[9, 25, 49, 121, 169, 289];

/// Composites with more than one divisor in range
pub const MULTI_FACTOR_COMPOSITES: &[u64] = &[105, 225, 315, 1155];

/// Open a ledger in `dir` with the given shard and buffer sizes
pub fn open_ledger(dir: &Path, max_shard_size: u64, max_buffer_size: u64) -> Arc<StorageEngine> {
    Arc::new(StorageEngine::open(ledger_config(dir, max_shard_size, max_buffer_size)).unwrap())
}

/// Dispatcher settings for a bounded run on an ephemeral port
pub fn bounded_run(mode: DispatchMode, limit: u64) -> CoordinatorConfig {
    CoordinatorConfig::builder()
        .bind_address_str("127.0.0.1:0")
        .unwrap()
        .mode(mode)
        .queue_capacity(16)
        .max_in_flight_candidates(8)
        .lease_timeout_secs(5)
        .enable_request_logging(false)
        .limit(limit)
        .build()
        .unwrap()
}
