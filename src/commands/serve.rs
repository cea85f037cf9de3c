use anyhow::{Context, Result};

use primedist::config::Config;
use primedist::coordinator::{ClientConfig, CoordinatorClient, CoordinatorConfig, CoordinatorServer};
use primedist::error::{Error, PrimedistErrorTrait};
use primedist::models::DispatchMode;
use primedist::utils::retry::{with_retry, RetryConfig};
use primedist::worker::{RunnerConfig, WorkerRunner};

use super::open_ledger;

// ============================================================================
// Dispatcher Server Implementation
// ============================================================================

/// Parameters for the dispatcher server
pub struct ServerParams {
    pub settings: Config,
    pub bind: Option<String>,
    pub mode: Option<DispatchMode>,
    pub show_rejections: bool,
}

/// Start the dispatcher server
pub async fn dispatcher_server(params: ServerParams) -> Result<()> {
    let ServerParams {
        settings,
        bind,
        mode,
        show_rejections,
    } = params;

    if let Err(e) = primedist::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics unavailable");
    }

    let mut builder = CoordinatorConfig::from_settings(&settings.dispatcher)?;
    if let Some(bind) = bind {
        builder = builder.bind_address_str(&bind)?;
    }
    if let Some(mode) = mode {
        builder = builder.mode(mode);
    }
    if show_rejections {
        builder = builder.show_rejections(true);
    }
    let config = builder.build()?;

    let storage = open_ledger(&settings)?;
    println!("Starting Prime Dispatcher");
    println!("=========================");
    println!("  Ledger: {}", storage.base_dir().display());
    println!("  Resuming after: {}", storage.last_prime().await);
    println!();

    let server = CoordinatorServer::new(config, storage)
        .await
        .context("Failed to create dispatcher server")?;

    println!("{}", server.info().display());
    println!();
    println!("Endpoints:");
    println!("  GET  /                - Take a whole candidate");
    println!("  POST /finished        - Return a whole-candidate verdict");
    println!("  GET  /heavy           - Take a divisor unit");
    println!("  POST /heavy/finished  - Return a divisor verdict");
    println!("  GET  /api/health      - Health check");
    println!("  GET  /api/stats       - Dispatcher stats");
    println!("  GET  /metrics         - Prometheus metrics endpoint");
    println!();
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await
        .map_err(Error::from)?;

    println!("Dispatcher stopped.");
    Ok(())
}

// ============================================================================
// Worker Client Implementation
// ============================================================================

/// Parameters for a worker client
pub struct ClientParams {
    pub settings: Config,
    pub coordinator: Option<String>,
    pub mode: Option<DispatchMode>,
    pub concurrency: Option<usize>,
}

/// Run a worker against a dispatcher
pub async fn worker_client(params: ClientParams) -> Result<()> {
    let ClientParams {
        settings,
        coordinator,
        mode,
        concurrency,
    } = params;

    let mut worker = settings.worker;
    if let Some(url) = coordinator {
        worker.coordinator_url = url;
    }
    if let Some(mode) = mode {
        worker.mode = mode;
    }
    if let Some(concurrency) = concurrency {
        worker.concurrency = concurrency;
    }

    let client = CoordinatorClient::new(
        ClientConfig::new(&worker.coordinator_url)
            .with_timeout(std::time::Duration::from_secs(worker.request_timeout_secs))
            .with_poll_timeout(std::time::Duration::from_secs(worker.poll_timeout_secs)),
    )
    .map_err(Error::from)?;

    println!("Starting Prime Worker");
    println!("=====================");
    println!("  Dispatcher: {}", worker.coordinator_url);
    println!("  Mode: {}", worker.mode);
    println!("  Concurrency: {}", worker.concurrency);
    println!();

    match with_retry(&RetryConfig::new(3), || client.health_check()).await {
        Ok(health) if health.mode != worker.mode => {
            tracing::warn!(
                dispatcher_mode = %health.mode,
                worker_mode = %worker.mode,
                "Dispatcher runs in a different mode; polls will be refused"
            );
        }
        Ok(health) => {
            tracing::info!(version = %health.version, healthy = health.healthy, "Dispatcher reachable");
        }
        Err(e) => {
            let err = Error::from(e);
            tracing::warn!(
                category = %err.category(),
                error = %err,
                "Dispatcher not reachable yet; polling will retry"
            );
        }
    }

    let runner = WorkerRunner::new(client, RunnerConfig::from(&worker));
    let handle = runner.shutdown_handle();
    let stats = runner.stats();

    // first Ctrl-C drains, second one exits
    let signals = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        println!("\nShutting down, finishing taken units (Ctrl+C again to exit)...");
        handle.shutdown();

        if tokio::signal::ctrl_c().await.is_ok() {
            let snapshot = stats.snapshot();
            eprintln!(
                "Forced exit with {} units evaluated",
                snapshot.units_evaluated
            );
            std::process::exit(1);
        }
    });

    let result = runner.run().await;
    signals.abort();
    let snapshot = result.map_err(Error::from)?;

    println!("\nWorker Summary");
    println!("==============");
    println!("Units evaluated: {}", snapshot.units_evaluated);
    println!("Verdicts reported: {}", snapshot.reports_sent);
    println!("Verdicts dropped: {}", snapshot.report_failures);
    println!("Poll failures: {}", snapshot.poll_failures);

    Ok(())
}
