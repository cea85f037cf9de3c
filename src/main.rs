mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use primedist::config::LoggingConfig;
use primedist::models::DispatchMode;

#[derive(Parser)]
#[command(
    name = "primedist",
    version,
    about = "Distributed prime generator with a sharded append-only ledger",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to PRIMEDIST_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configuration file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatcher server
    Server {
        /// Bind address (host:port)
        #[arg(short, long)]
        bind: Option<String>,

        /// Dispatch mode
        #[arg(short, long, value_enum)]
        mode: Option<DispatchMode>,

        /// Print rejected candidates
        #[arg(long, default_value = "false")]
        show_rejections: bool,
    },

    /// Run a worker against a dispatcher
    Client {
        /// Dispatcher URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Dispatch mode (must match the dispatcher)
        #[arg(short, long, value_enum)]
        mode: Option<DispatchMode>,

        /// Number of concurrent evaluators
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },

    /// Generate primes in-process, without HTTP
    Run {
        /// Stop before this value
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Print the number of stored primes
    Count,

    /// Write a default configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "primedist.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { path, force } = &cli.command {
        setup_tracing(&LoggingConfig::default(), cli.log_format.as_deref(), cli.verbose)?;
        return commands::init_config(path, *force);
    }

    let settings = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    setup_tracing(&settings.logging, cli.log_format.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Server {
            bind,
            mode,
            show_rejections,
        } => {
            tracing::info!(bind = ?bind, mode = ?mode, "Starting server command");
            commands::dispatcher_server(commands::ServerParams {
                settings,
                bind,
                mode,
                show_rejections,
            })
            .await?;
        }

        Commands::Client {
            coordinator,
            mode,
            concurrency,
        } => {
            tracing::info!(
                coordinator = ?coordinator,
                mode = ?mode,
                concurrency = ?concurrency,
                "Starting client command"
            );
            commands::worker_client(commands::ClientParams {
                settings,
                coordinator,
                mode,
                concurrency,
            })
            .await?;
        }

        Commands::Run { limit } => {
            tracing::info!(limit = ?limit, "Starting run command");
            commands::run(settings, limit).await?;
        }

        Commands::Count => {
            commands::count(settings).await?;
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn setup_tracing(logging: &LoggingConfig, format: Option<&str>, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("primedist=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("primedist={},warn", logging.level))
        })
    };

    match format.unwrap_or(&logging.format) {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
