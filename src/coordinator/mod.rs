//! Dispatcher for distributed prime verification
//!
//! This module hands units to workers over HTTP and folds their verdicts into
//! confirmed primes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │           Dispatch Engine           │
//! │                                     │
//! │  ┌──────────────────────────────┐  │
//! │  │          Dispatcher          │  │
//! │  │  - Bounded unit queue        │  │
//! │  │  - Leases and re-dispatch    │  │
//! │  └──────────────────────────────┘  │
//! │                                     │
//! │  ┌──────────────────────────────┐  │
//! │  │       Result Aggregator      │  │
//! │  │  - Candidate board           │  │
//! │  │  - Stale/duplicate handling  │  │
//! │  └──────────────────────────────┘  │
//! │                                     │
//! │  ┌──────────────────────────────┐  │
//! │  │           REST API           │  │
//! │  │  GET  /  POST /finished      │  │
//! │  │  GET  /heavy                 │  │
//! │  │  POST /heavy/finished        │  │
//! │  │  GET  /api/health /api/stats │  │
//! │  └──────────────────────────────┘  │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use primedist::coordinator::{CoordinatorServer, CoordinatorConfig};
//!
//! let config = CoordinatorConfig::default();
//! let server = CoordinatorServer::new(config, storage).await?;
//! server.start_with_shutdown(shutdown).await?;
//! ```

pub mod aggregator;
pub mod api;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod server;

pub use aggregator::{
    validate_verdict, BoardCounters, CandidateBoard, Outcome, ResultAggregator, SharedBoard,
    VerdictError,
};
pub use api::{ApiResponse, ErrorResponse, HealthResponse};
pub use client::{ClientConfig, ClientError, CoordinatorClient, HealthStatus};
pub use config::{ConfigError, CoordinatorConfig, CoordinatorConfigBuilder};
pub use dispatcher::{DispatchError, Dispatchable, Dispatcher, DispatcherSnapshot};
pub use engine::{DispatchEngine, EngineError, EngineStats, LedgerStats};
pub use server::{AppState, CoordinatorServer, ServerError, ServerInfo};
