//! Common test utilities

use std::path::Path;

use primedist::config::StorageConfig;

/// Ledger configuration rooted at `dir`
pub fn ledger_config(dir: &Path, max_shard_size: u64, max_buffer_size: u64) -> StorageConfig {
    StorageConfig {
        base_dir: dir.to_path_buf(),
        starting_prime: 1,
        max_shard_size,
        max_buffer_size,
    }
}

/// Every value in the ledger, in index order
#[allow(dead_code)]
pub fn read_ledger(dir: &Path) -> Vec<u64> {
    let index = std::fs::read_to_string(dir.join("directory.txt")).unwrap_or_default();
    let mut values = Vec::new();
    for name in index.lines().take_while(|l| !l.is_empty()) {
        let shard = std::fs::read_to_string(dir.join(format!("{name}.txt"))).unwrap_or_default();
        values.extend(shard.lines().map(|l| l.trim().parse::<u64>().unwrap()));
    }
    values
}

/// Odd primes below `limit`, by sieve
#[allow(dead_code)]
pub fn odd_primes_below(limit: u64) -> Vec<u64> {
    let n = limit as usize;
    let mut composite = vec![false; n.max(2)];
    let mut primes = Vec::new();
    for i in 2..n {
        if composite[i] {
            continue;
        }
        if i != 2 {
            primes.push(i as u64);
        }
        let mut j = i * i;
        while j < n {
            composite[j] = true;
            j += i;
        }
    }
    primes
}
