use anyhow::Result;

use primedist::config::Config;
use primedist::local::run_local;
use primedist::utils::round_to_hundred;

use super::open_ledger;

/// Generate primes in-process, without a dispatcher server
pub async fn run(settings: Config, limit: Option<u64>) -> Result<()> {
    println!("Starting local generation");
    println!("=========================");
    println!("  Ledger: {}", settings.storage.base_dir.display());
    println!("  Mode: {}", settings.dispatcher.mode);
    println!("  Concurrency: {}", settings.worker.concurrency);
    match limit {
        Some(limit) => println!("  Limit: {limit}"),
        None => println!("  Limit: none (Ctrl+C to stop)"),
    }
    println!();

    let summary = run_local(&settings, limit).await?;

    println!("\nRun Summary");
    println!("===========");
    println!("Resumed after: {}", summary.resumed_after);
    println!("Last prime: {}", summary.last_prime);
    println!("Units evaluated: {}", summary.worker.units_evaluated);
    println!("Ledger counter: {}", summary.last_assigned_id);

    Ok(())
}

/// Print the approximate number of stored primes
pub async fn count(settings: Config) -> Result<()> {
    let storage = open_ledger(&settings)?;

    let total = storage.total_prime_count().await?;
    tracing::debug!(exact = total, "Counted stored primes");

    println!(
        "Total (to the nearest hundred) number of primes calculated: {}",
        round_to_hundred(total)
    );
    Ok(())
}
