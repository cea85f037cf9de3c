//! Prometheus metrics for the dispatcher and the prime ledger
//!
//! This module provides metrics tracking for:
//! - Dispatcher: units handed out, abandoned and requeued, candidate outcomes,
//!   anomalous verdicts, API requests
//! - Storage: shard flushes and primes written
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all dispatcher metrics
struct DispatchMetrics {
    units_dispatched: CounterVec,
    units_abandoned: Counter,
    units_requeued: Counter,
    pending_units: Gauge,
    candidates_resolved: CounterVec,
    anomalous_verdicts: CounterVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

/// Container for all ledger metrics
struct StorageMetrics {
    flushes: Counter,
    primes_written: Counter,
    flush_duration: Histogram,
}

/// Global storage for dispatcher metrics
static DISPATCH_METRICS: OnceLock<DispatchMetrics> = OnceLock::new();

/// Global storage for ledger metrics
static STORAGE_METRICS: OnceLock<StorageMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = primedist::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let dispatch = DispatchMetrics {
        units_dispatched: register_counter_vec!(
            "primedist_units_dispatched_total",
            "Units handed to workers by dispatch mode",
            &["mode"]
        )?,
        units_abandoned: register_counter!(
            "primedist_units_abandoned_total",
            "Queued units skipped because their candidate was already resolved"
        )?,
        units_requeued: register_counter!(
            "primedist_units_requeued_total",
            "Units re-dispatched after their lease expired"
        )?,
        pending_units: register_gauge!(
            "primedist_pending_units",
            "Units waiting in the dispatch queue"
        )?,
        candidates_resolved: register_counter_vec!(
            "primedist_candidates_resolved_total",
            "Candidates resolved by outcome",
            &["outcome"]
        )?,
        anomalous_verdicts: register_counter_vec!(
            "primedist_anomalous_verdicts_total",
            "Verdicts that did not advance any candidate",
            &["kind"]
        )?,
        api_requests: register_counter_vec!(
            "primedist_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "primedist_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 300.0]
        )?,
    };

    let storage = StorageMetrics {
        flushes: register_counter!(
            "primedist_storage_flushes_total",
            "Buffer flushes written to shard files"
        )?,
        primes_written: register_counter!(
            "primedist_storage_primes_written_total",
            "Primes appended to shard files"
        )?,
        flush_duration: register_histogram!(
            "primedist_storage_flush_duration_seconds",
            "Time spent writing one flush",
            vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
        )?,
    };

    DISPATCH_METRICS
        .set(dispatch)
        .map_err(|_| "Dispatch metrics already initialized")?;
    STORAGE_METRICS
        .set(storage)
        .map_err(|_| "Storage metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    DISPATCH_METRICS.get().is_some() && STORAGE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a unit handed to a worker
pub fn record_dispatched(mode: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.units_dispatched.with_label_values(&[mode]).inc();
    }
}

/// Record a queued unit skipped at dispatch time
pub fn record_abandoned() {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.units_abandoned.inc();
    }
}

/// Record units put back after a lease expired
pub fn record_requeued(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = DISPATCH_METRICS.get() {
        m.units_requeued.inc_by(count as f64);
    }
}

/// Update the pending-unit gauge
pub fn set_pending_units(pending: usize) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.pending_units.set(pending as f64);
    }
}

/// Record a candidate resolution (`confirmed` or `rejected`)
pub fn record_resolution(outcome: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.candidates_resolved.with_label_values(&[outcome]).inc();
    }
}

/// Record a verdict that was dropped (`stale`, `duplicate` or `malformed`)
pub fn record_anomaly(kind: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.anomalous_verdicts.with_label_values(&[kind]).inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = DISPATCH_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Record a completed shard flush
pub fn record_flush(written: usize, duration_secs: f64) {
    let Some(m) = STORAGE_METRICS.get() else {
        return;
    };

    m.flushes.inc();
    m.primes_written.inc_by(written as f64);
    m.flush_duration.observe(duration_secs);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
        // Idempotent
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_metrics_initialized() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_resolution("confirmed");
        let text = encode_metrics().unwrap();
        assert!(text.contains("primedist_candidates_resolved_total"));
    }

    #[test]
    fn test_recording_does_not_panic() {
        ensure_metrics_initialized();
        record_dispatched("split");
        record_abandoned();
        record_requeued(3);
        record_requeued(0);
        set_pending_units(12);
        record_anomaly("stale");
        record_api_request("/heavy", 200, 0.002);
        record_flush(300, 0.004);
    }
}
