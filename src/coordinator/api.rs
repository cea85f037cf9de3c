//! REST API handlers for the dispatcher server
//!
//! Work endpoints carry bare unit JSON; the `/api` endpoints wrap their payload
//! in [`ApiResponse`].

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Instant;

use super::engine::{EngineError, EngineStats};
use super::server::AppState;
use crate::metrics;
use crate::models::{CandidateCheck, DispatchMode, SubComputation, WorkUnit};

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub mode: DispatchMode,
    pub timestamp: String,
}

/// Stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub engine: EngineStats,
    pub uptime_secs: u64,
    pub started_at: String,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Whole-candidate endpoints
        .route("/", get(poll_candidate))
        .route("/finished", post(return_candidate))
        // Divisor endpoints
        .route("/heavy", get(poll_division))
        .route("/heavy/finished", post(return_division))
        // Operational endpoints
        .route("/api/health", get(health_check))
        .route("/api/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

fn engine_error_response(error: &EngineError) -> Response {
    let status = match error {
        EngineError::ModeMismatch { .. } => StatusCode::CONFLICT,
        EngineError::Verdict(_) => StatusCode::BAD_REQUEST,
        EngineError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, error.to_string())
}

fn observe(endpoint: &str, started: Instant, response: Response) -> Response {
    metrics::record_api_request(
        endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Work Handlers
// ============================================================================

/// Block until a unit is pending and hand it out
async fn poll(state: &AppState, mode: DispatchMode) -> Response {
    match state.engine.request_work(mode).await {
        Ok(Some(WorkUnit::Division(unit))) => (StatusCode::OK, Json(unit)).into_response(),
        Ok(Some(WorkUnit::Whole(unit))) => (StatusCode::OK, Json(unit)).into_response(),
        Ok(None) => error_response(StatusCode::SERVICE_UNAVAILABLE, "Dispatcher is shutting down"),
        Err(e) => engine_error_response(&e),
    }
}

/// Decode a returned unit and pass it to the engine
async fn accept<T, F>(state: &AppState, body: &[u8], wrap: F) -> Response
where
    T: DeserializeOwned,
    F: FnOnce(T) -> WorkUnit,
{
    let unit = match serde_json::from_slice::<T>(body) {
        Ok(unit) => wrap(unit),
        Err(e) => {
            metrics::record_anomaly("malformed");
            tracing::warn!(error = %e, "Malformed verdict payload");
            return error_response(StatusCode::BAD_REQUEST, format!("Malformed payload: {e}"));
        }
    };

    match state.engine.report(unit).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success("accepted"))).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

async fn poll_candidate(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let response = poll(&state, DispatchMode::Whole).await;
    observe("/", started, response)
}

async fn return_candidate(State(state): State<AppState>, body: Bytes) -> Response {
    let started = Instant::now();
    let response = accept::<CandidateCheck, _>(&state, &body, WorkUnit::Whole).await;
    observe("/finished", started, response)
}

async fn poll_division(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let response = poll(&state, DispatchMode::Split).await;
    observe("/heavy", started, response)
}

async fn return_division(State(state): State<AppState>, body: Bytes) -> Response {
    let started = Instant::now();
    let response = accept::<SubComputation, _>(&state, &body, WorkUnit::Division).await;
    observe("/heavy/finished", started, response)
}

// ============================================================================
// Operational Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.engine.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };

    Json(ApiResponse::success(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        mode: state.engine.mode(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Get dispatcher stats
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(StatsResponse {
        engine: state.engine.stats().await,
        uptime_secs: state.start_time.elapsed().as_secs(),
        started_at: state.started_at.to_rfc3339(),
    }))
}

/// Prometheus exposition
async fn get_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
