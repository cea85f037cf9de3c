//! Dispatcher client for worker processes
//!
//! Polls the dispatcher for units and posts verdicts back. Polls block on the
//! server side until work is pending, so they use a longer timeout than reports.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{CandidateCheck, DispatchMode, SubComputation, WorkUnit};
use crate::worker::WorkSource;

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the dispatcher client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Dispatcher server URL
    pub coordinator_url: String,

    /// Timeout for reports and health checks
    pub timeout: Duration,

    /// Timeout for blocking polls
    pub poll_timeout: Duration,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(300),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.coordinator_url, path)
    }
}

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response from the dispatcher
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Health response from API
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub mode: DispatchMode,
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for communicating with the dispatcher
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
}

impl CoordinatorClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Take one divisor unit (`GET /heavy`)
    pub async fn fetch_division(&self) -> Result<SubComputation, ClientError> {
        self.poll("/heavy").await
    }

    /// Return a divisor verdict (`POST /heavy/finished`)
    pub async fn report_division(&self, unit: &SubComputation) -> Result<(), ClientError> {
        self.post("/heavy/finished", unit).await
    }

    /// Take one whole candidate (`GET /`)
    pub async fn fetch_candidate(&self) -> Result<CandidateCheck, ClientError> {
        self.poll("/").await
    }

    /// Return a whole-candidate verdict (`POST /finished`)
    pub async fn report_candidate(&self, unit: &CandidateCheck) -> Result<(), ClientError> {
        self.post("/finished", unit).await
    }

    /// Check dispatcher health
    pub async fn health_check(&self) -> Result<HealthStatus, ClientError> {
        let response = self
            .http_client
            .get(self.config.url("/api/health"))
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        let api_response: ApiResponse<HealthResponse> = decode(response).await?;
        let health = api_response.data.ok_or_else(|| {
            ClientError::InvalidResponse(
                api_response
                    .error
                    .unwrap_or_else(|| "Health response carried no data".to_string()),
            )
        })?;

        Ok(HealthStatus {
            healthy: health.status == "healthy",
            version: health.version,
            uptime_secs: health.uptime_secs,
            mode: health.mode,
        })
    }

    async fn poll<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http_client
            .get(self.config.url(path))
            .timeout(self.config.poll_timeout)
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        decode(response).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ClientError> {
        let response = self
            .http_client
            .post(self.config.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);

    Err(ClientError::HttpError {
        status: status.as_u16(),
        message,
    })
}

/// Read the whole body, then decode it
///
/// A connection lost mid-body is a network error; only complete bytes that do
/// not decode are a parse error.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let body = check_status(response)
        .await?
        .bytes()
        .await
        .map_err(|e| ClientError::NetworkError(e.to_string()))?;

    serde_json::from_slice(&body).map_err(|e| ClientError::ParseError(e.to_string()))
}

#[async_trait]
impl WorkSource for CoordinatorClient {
    type Error = ClientError;

    async fn next_unit(&self, mode: DispatchMode) -> Result<Option<WorkUnit>, ClientError> {
        let unit = match mode {
            DispatchMode::Split => WorkUnit::Division(self.fetch_division().await?),
            DispatchMode::Whole => WorkUnit::Whole(self.fetch_candidate().await?),
        };
        Ok(Some(unit))
    }

    async fn report(&self, unit: &WorkUnit) -> Result<(), ClientError> {
        match unit {
            WorkUnit::Division(sub) => self.report_division(sub).await,
            WorkUnit::Whole(check) => self.report_candidate(check).await,
        }
    }

    fn is_transient(&self, error: &ClientError) -> bool {
        error.is_transport()
    }
}

/// Health status
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub mode: DispatchMode,
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Initialization error
    InitError(String),

    /// Network error
    NetworkError(String),

    /// HTTP error
    HttpError { status: u16, message: String },

    /// Parse error
    ParseError(String),

    /// Invalid response
    InvalidResponse(String),
}

impl ClientError {
    /// Whether the failure is in the transport and worth retrying
    ///
    /// Connection failures, timeouts and 5xx answers (including the 503 sent
    /// during shutdown) are transport errors. `409` means the worker polls the
    /// wrong mode and other 4xx answers mean the payload was refused; retrying
    /// those cannot succeed.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::HttpError { status, .. } => StatusCode::from_u16(*status)
                .map(|s| s.is_server_error())
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Client initialization error: {}", msg),
            Self::NetworkError(msg) => write!(f, "Network error: {}", msg),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            Self::ParseError(msg) => write!(f, "Parse error: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

// ============================================================================
// Tests
// ============================================================================
