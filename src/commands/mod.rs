pub mod init;
pub mod run;
pub mod serve;

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;

use primedist::config::Config;
use primedist::error::{Error, PrimedistErrorTrait};
use primedist::storage::StorageEngine;

// Re-export command functions for convenience
pub use init::init_config;
pub use run::{count, run};
pub use serve::{dispatcher_server, worker_client, ClientParams, ServerParams};

/// Load and validate the configuration for a command
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(Some(path))
            .with_context(|| format!("Invalid configuration in {}", path.display()))?,
        None => Config::load(None).context("Invalid PRIMEDIST_* configuration")?,
    };
    Ok(config)
}

/// Open the ledger, logging how a failure is classified
pub fn open_ledger(config: &Config) -> primedist::error::Result<Arc<StorageEngine>> {
    StorageEngine::open(config.storage.clone())
        .map(Arc::new)
        .map_err(|e| {
            let err = Error::from(e);
            tracing::error!(
                category = %err.category(),
                recoverable = err.is_recoverable(),
                error = %err,
                "Cannot open prime ledger"
            );
            err
        })
}
