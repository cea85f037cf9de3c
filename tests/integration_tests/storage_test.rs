//! Ledger persistence across process restarts

use std::time::Duration;

use primedist::storage::{DirectoryIndex, StorageEngine};
use tempfile::TempDir;

use super::fixtures::open_ledger;
use crate::common::{ledger_config, odd_primes_below, read_ledger};

#[tokio::test]
async fn test_rollover_spreads_primes_over_shards() {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(dir.path(), 20, 5);
    let primes = odd_primes_below(200);
    assert_eq!(primes.len(), 45);

    for &p in &primes {
        ledger.append(p, Duration::ZERO).await.unwrap();
    }

    // 45 primes in 9 full buffers; nothing left to flush
    assert_eq!(ledger.buffered().await, 0);
    assert_eq!(ledger.last_assigned_id().await, 45);
    assert_eq!(ledger.shards().await.unwrap(), vec!["0-20", "20-40", "40-60"]);
    assert_eq!(read_ledger(dir.path()), primes);
    assert_eq!(ledger.last_prime().await, 199);
}

#[tokio::test]
async fn test_reopen_continues_where_it_stopped() {
    let dir = TempDir::new().unwrap();
    {
        let ledger = open_ledger(dir.path(), 20, 5);
        for p in [3, 5, 7, 11, 13, 17, 19] {
            ledger.append(p, Duration::ZERO).await.unwrap();
        }
        ledger.flush().await.unwrap();
        assert_eq!(ledger.last_assigned_id().await, 10);
    }

    let ledger = StorageEngine::open(ledger_config(dir.path(), 20, 5)).unwrap();
    assert_eq!(ledger.resume_point().await.unwrap(), 19);
    assert_eq!(ledger.total_prime_count().await.unwrap(), 7);
    // 7 rounds to the next flush boundary
    assert_eq!(ledger.last_assigned_id().await, 10);

    let outcome = ledger.append(23, Duration::ZERO).await.unwrap();
    assert_eq!(outcome.record.id, 10);
    ledger.flush().await.unwrap();

    assert_eq!(read_ledger(dir.path()), vec![3, 5, 7, 11, 13, 17, 19, 23]);
    assert_eq!(ledger.shards().await.unwrap(), vec!["0-20"]);
}

#[tokio::test]
async fn test_index_names_shard_before_it_exists() {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(dir.path(), 4, 2);

    for p in [3, 5, 7, 11] {
        ledger.append(p, Duration::ZERO).await.unwrap();
    }

    // a crash between the index write and the shard write leaves a name without a file
    let index = DirectoryIndex::new(dir.path());
    index.append("4-8").unwrap();
    drop(ledger);

    let ledger = StorageEngine::open(ledger_config(dir.path(), 4, 2)).unwrap();
    assert_eq!(ledger.total_prime_count().await.unwrap(), 4);
    assert_eq!(ledger.resume_point().await.unwrap(), 1);

    ledger.append(13, Duration::ZERO).await.unwrap();
    ledger.flush().await.unwrap();
    assert_eq!(ledger.shards().await.unwrap(), vec!["0-4", "4-8"]);
    assert_eq!(read_ledger(dir.path()), vec![3, 5, 7, 11, 13]);
}

#[tokio::test]
async fn test_starting_prime_used_for_empty_ledger() {
    let dir = TempDir::new().unwrap();
    let mut config = ledger_config(dir.path(), 20, 5);
    config.starting_prime = 101;

    let ledger = StorageEngine::open(config).unwrap();
    assert_eq!(ledger.resume_point().await.unwrap(), 101);
    assert_eq!(ledger.last_prime().await, 101);
    assert_eq!(ledger.total_prime_count().await.unwrap(), 0);
}
