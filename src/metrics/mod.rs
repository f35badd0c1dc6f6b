//! Prometheus metrics for the curator
//!
//! This module tracks:
//! - Orchestrator: requests per view and outcome, backend call latency and
//!   errors, forwarded calls, load-time invalidations
//! - Pools: handles currently in use
//! - HTTP surface: requests per endpoint and status
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct CuratorMetrics {
    view_requests: CounterVec,
    backend_duration: HistogramVec,
    backend_errors: CounterVec,
    forwarded_calls: CounterVec,
    invalidated_views: CounterVec,
    pool_in_use: GaugeVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

static CURATOR_METRICS: OnceLock<CuratorMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = curator::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = CuratorMetrics {
        view_requests: register_counter_vec!(
            "curator_view_requests_total",
            "View requests by view and outcome",
            &["view", "outcome"]
        )?,
        backend_duration: register_histogram_vec!(
            "curator_backend_call_duration_seconds",
            "Backend call duration in seconds",
            &["view"],
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
        backend_errors: register_counter_vec!(
            "curator_backend_errors_total",
            "Backend call failures by view and error kind",
            &["view", "kind"]
        )?,
        forwarded_calls: register_counter_vec!(
            "curator_forwarded_calls_total",
            "Calls forwarded to the master by operation",
            &["operation"]
        )?,
        invalidated_views: register_counter_vec!(
            "curator_invalidated_views_total",
            "Views dropped at load time as stale or dependent on a stale view",
            &["view"]
        )?,
        pool_in_use: register_gauge_vec!(
            "curator_pool_handles_in_use",
            "Pool handles currently borrowed",
            &["pool"]
        )?,
        api_requests: register_counter_vec!(
            "curator_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "curator_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    CURATOR_METRICS
        .set(metrics)
        .map_err(|_| "Curator metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CURATOR_METRICS.get().is_some()
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

/// Record the outcome of one view request (`cached`, `computed`, `forwarded`, `failed`)
pub fn record_view_request(view: &str, outcome: &str) {
    if let Some(m) = CURATOR_METRICS.get() {
        m.view_requests.with_label_values(&[view, outcome]).inc();
    }
}

/// Record a failed backend call
pub fn record_backend_error(view: &str, kind: &str) {
    if let Some(m) = CURATOR_METRICS.get() {
        m.backend_errors.with_label_values(&[view, kind]).inc();
    }
}

/// Record a call forwarded to the master
pub fn record_forwarded(operation: &str) {
    if let Some(m) = CURATOR_METRICS.get() {
        m.forwarded_calls.with_label_values(&[operation]).inc();
    }
}

/// Record a view removed by the load-time invalidation pass
pub fn record_invalidation(view: &str) {
    if let Some(m) = CURATOR_METRICS.get() {
        m.invalidated_views.with_label_values(&[view]).inc();
    }
}

/// Update the in-use gauge of a pool
pub fn set_pool_in_use(pool: &str, in_use: usize) {
    if let Some(m) = CURATOR_METRICS.get() {
        m.pool_in_use.with_label_values(&[pool]).set(in_use as f64);
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = CURATOR_METRICS.get() else {
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

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a backend call timer for `view`
pub fn start_backend_timer(view: &str) -> MetricsTimer {
    match CURATOR_METRICS.get() {
        Some(m) => MetricsTimer::new(m.backend_duration.with_label_values(&[view]).start_timer()),
        None => MetricsTimer::noop(),
    }
}
