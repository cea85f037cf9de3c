//! Dispatcher and workers talking over loopback HTTP

use std::sync::Arc;
use std::time::Duration;

use primedist::coordinator::{ClientConfig, CoordinatorClient, CoordinatorServer};
use primedist::models::DispatchMode;
use primedist::storage::StorageEngine;
use primedist::worker::{RunnerConfig, WorkerRunner};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::fixtures::{bounded_run, open_ledger};
use crate::common::{odd_primes_below, read_ledger};

const RUN_TIMEOUT: Duration = Duration::from_secs(60);
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Serve a bounded run on an ephemeral port; the handle resolves once it completes
async fn spawn_dispatcher(
    mode: DispatchMode,
    limit: u64,
    ledger: Arc<StorageEngine>,
) -> (String, JoinHandle<()>) {
    let server = CoordinatorServer::new(bounded_run(mode, limit), ledger)
        .await
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        server
            .serve_on(listener, std::future::pending())
            .await
            .unwrap();
    });

    (url, handle)
}

fn runner(url: &str, mode: DispatchMode, concurrency: usize) -> WorkerRunner<CoordinatorClient> {
    let client = CoordinatorClient::new(
        ClientConfig::new(url)
            .with_timeout(Duration::from_secs(5))
            .with_poll_timeout(Duration::from_secs(5)),
    )
    .unwrap();

    WorkerRunner::new(
        client,
        RunnerConfig {
            mode,
            concurrency,
            retry_delay: Duration::from_millis(20),
        },
    )
}

/// Run `workers` runners against a bounded dispatcher until it completes
async fn bounded_round(
    mode: DispatchMode,
    limit: u64,
    workers: usize,
    concurrency: usize,
    dir: &TempDir,
) -> u64 {
    let ledger = open_ledger(dir.path(), 100, 10);
    let (url, dispatcher) = spawn_dispatcher(mode, limit, Arc::clone(&ledger)).await;

    let mut handles = Vec::new();
    let mut stats = Vec::new();
    let mut tasks = Vec::new();
    for _ in 0..workers {
        let runner = runner(&url, mode, concurrency);
        handles.push(runner.shutdown_handle());
        stats.push(runner.stats());
        tasks.push(tokio::spawn(async move { runner.run().await }));
    }

    tokio::time::timeout(RUN_TIMEOUT, dispatcher)
        .await
        .expect("dispatcher did not finish")
        .unwrap();

    for handle in &handles {
        handle.shutdown();
    }

    // a late verdict for a resolved candidate keeps retrying against the closed
    // dispatcher; abort those workers the way a second Ctrl-C would
    for task in tasks {
        let abort = task.abort_handle();
        if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
            abort.abort();
        }
    }

    let evaluated = stats.iter().map(|s| s.snapshot().units_evaluated).sum();

    assert_eq!(ledger.buffered().await, 0);
    evaluated
}

#[tokio::test]
async fn test_split_mode_end_to_end() {
    let dir = TempDir::new().unwrap();
    let evaluated = bounded_round(DispatchMode::Split, 400, 2, 3, &dir).await;

    let mut stored = read_ledger(dir.path());
    stored.sort_unstable();
    assert_eq!(stored, odd_primes_below(400));
    assert!(evaluated > 0);
}

#[tokio::test]
async fn test_whole_mode_end_to_end() {
    let dir = TempDir::new().unwrap();
    let evaluated = bounded_round(DispatchMode::Whole, 300, 2, 3, &dir).await;

    let mut stored = read_ledger(dir.path());
    stored.sort_unstable();
    assert_eq!(stored, odd_primes_below(300));
    // one unit per candidate, 3 through 299
    assert!(evaluated >= 149);
}

#[tokio::test]
async fn test_second_run_resumes_from_ledger() {
    let dir = TempDir::new().unwrap();
    // a single evaluator confirms in candidate order, so the last line is the largest
    bounded_round(DispatchMode::Whole, 100, 1, 1, &dir).await;
    bounded_round(DispatchMode::Split, 200, 1, 1, &dir).await;

    let mut stored = read_ledger(dir.path());
    stored.sort_unstable();
    assert_eq!(stored, odd_primes_below(200));

    let ledger = StorageEngine::open(crate::common::ledger_config(dir.path(), 100, 10)).unwrap();
    assert_eq!(ledger.resume_point().await.unwrap(), 199);
}

#[tokio::test]
async fn test_worker_in_wrong_mode_stops() {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(dir.path(), 100, 10);
    let (url, dispatcher) = spawn_dispatcher(DispatchMode::Split, 1_000_000, ledger).await;

    let runner = runner(&url, DispatchMode::Whole, 1);
    let result = tokio::time::timeout(RUN_TIMEOUT, runner.run())
        .await
        .expect("worker did not stop");

    assert!(result.is_err());
    assert_eq!(runner.stats().snapshot().units_evaluated, 0);
    dispatcher.abort();
}
