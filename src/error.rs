//! Unified error handling for the primedist crate
//!
//! Each module keeps its own error type; [`Error`] wraps them so command code
//! can classify any failure with [`PrimedistErrorTrait`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use primedist::error::{Error, PrimedistErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::coordinator::client::ClientError;
pub use crate::coordinator::engine::EngineError;
pub use crate::coordinator::server::ServerError;
pub use crate::storage::StorageError;
pub use crate::worker::RunnerError;

/// Common trait for primedist error types
pub trait PrimedistErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport errors between worker and dispatcher
    Network,
    /// Malformed units and verdicts
    Payload,
    /// Ledger and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label for log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Payload => "payload",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the primedist crate
#[derive(Error, Debug)]
pub enum Error {
    /// Dispatcher client errors
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Dispatch engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Dispatcher server errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Worker pool errors
    #[error("Worker error: {0}")]
    Runner(#[from] RunnerError),

    /// A unit or verdict that could not be decoded
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Ledger errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PrimedistErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Client(e) => e.is_transport(),
            Self::Engine(_) => false,
            Self::Server(_) => false,
            Self::Runner(_) => false,
            Self::MalformedPayload(_) => true, // dropped, the run continues
            Self::Storage(_) => false,
            Self::Io(_) => false,
            Self::Json(_) => true,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Client(ClientError::ParseError(_)) => ErrorCategory::Payload,
            Self::Client(_) | Self::Http(_) | Self::Runner(_) => ErrorCategory::Network,
            Self::Engine(EngineError::Storage(_)) => ErrorCategory::Storage,
            Self::Engine(EngineError::ModeMismatch { .. }) => ErrorCategory::Config,
            Self::Engine(EngineError::Verdict(_)) => ErrorCategory::Payload,
            Self::Server(ServerError::LedgerError(_)) => ErrorCategory::Storage,
            Self::Server(ServerError::ConfigError(_)) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Network,
            Self::MalformedPayload(_) | Self::Json(_) => ErrorCategory::Payload,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
