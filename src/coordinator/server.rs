//! Dispatcher server implementation
//!
//! Owns the dispatch engine and exposes it over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::api::create_router;
use super::config::CoordinatorConfig;
use super::engine::DispatchEngine;
use crate::models::DispatchMode;
use crate::storage::StorageEngine;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Running dispatch pipeline
    pub engine: Arc<DispatchEngine>,

    /// Server start time
    pub start_time: Instant,

    /// Wall-clock start time, for reporting
    pub started_at: DateTime<Utc>,

    /// Configuration
    pub config: CoordinatorConfig,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main dispatcher server
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    state: AppState,
}

impl CoordinatorServer {
    /// Create the server and start its dispatch engine
    pub async fn new(
        config: CoordinatorConfig,
        storage: Arc<StorageEngine>,
    ) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let engine = DispatchEngine::start(config.clone(), storage).await;

        let state = AppState {
            engine,
            start_time: Instant::now(),
            started_at: Utc::now(),
            config: config.clone(),
        };

        Ok(Self { config, state })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// The dispatch engine
    pub fn engine(&self) -> &Arc<DispatchEngine> {
        &self.state.engine
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Bind the configured address and serve until `shutdown_signal` fires
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("{addr}: {e}")))?;

        self.serve_on(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener
    ///
    /// Stops when `shutdown_signal` fires, when a limited run completes, or when
    /// the ledger fails. Confirmed primes are flushed before this returns; a
    /// ledger failure is returned as [`ServerError::LedgerError`].
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let engine = Arc::clone(&self.state.engine);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, mode = %self.config.mode, "Dispatcher listening");
        }

        let signal_engine = Arc::clone(&engine);
        let graceful = async move {
            tokio::select! {
                _ = shutdown_signal => {
                    tracing::info!("Shutdown requested");
                }
                _ = signal_engine.wait() => {
                    tracing::info!("Dispatch engine stopped");
                }
            }
            signal_engine.shutdown();
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        engine
            .wait()
            .await
            .map_err(|e| ServerError::LedgerError(e.to_string()))?;

        tracing::info!("Dispatcher shutdown complete");
        Ok(())
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            mode: self.config.mode,
            queue_capacity: self.config.queue_capacity,
            max_in_flight_candidates: self.config.max_in_flight_candidates,
            lease_timeout_secs: self.config.lease_timeout_secs,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub mode: DispatchMode,
    pub queue_capacity: usize,
    pub max_in_flight_candidates: usize,
    pub lease_timeout_secs: u64,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        let lease = if self.lease_timeout_secs == 0 {
            "disabled".to_string()
        } else {
            format!("{}s", self.lease_timeout_secs)
        };

        format!(
            "Prime Dispatcher\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Mode: {}\n\
             Queue Capacity: {}\n\
             Candidates In Flight: {}\n\
             Lease Timeout: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.mode,
            self.queue_capacity,
            self.max_in_flight_candidates,
            lease,
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),

    /// The ledger failed while serving
    LedgerError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
            Self::LedgerError(msg) => write!(f, "Ledger error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================
