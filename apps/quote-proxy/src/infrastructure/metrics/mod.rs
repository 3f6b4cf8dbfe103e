//! Prometheus Metrics Module
//!
//! Exposes proxy metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Cache**: Lookups by result, evictions and occupancy per store
//! - **Upstream**: Requests by outcome and latency
//! - **History**: Points recorded and persistence failures
//! - **Scheduler**: Job runs by outcome and circuit-breaker trips
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port. Recording before
//! [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the existing handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Cache
    describe_counter!(
        "quote_proxy_cache_lookups_total",
        "Response cache lookups by result"
    );
    describe_counter!(
        "quote_proxy_cache_evictions_total",
        "Entries evicted to respect store capacity"
    );
    describe_counter!(
        "quote_proxy_cache_cleanup_removed_total",
        "Entries removed by periodic cleanup sweeps"
    );
    describe_gauge!("quote_proxy_cache_entries", "Entries held per store");

    // Upstream
    describe_counter!(
        "quote_proxy_upstream_requests_total",
        "Upstream requests by api and outcome"
    );
    describe_histogram!(
        "quote_proxy_upstream_request_seconds",
        "Upstream request latency"
    );

    // History
    describe_counter!(
        "quote_proxy_history_appends_total",
        "History points recorded"
    );
    describe_counter!(
        "quote_proxy_persistence_failures_total",
        "History store failures by operation"
    );

    // Scheduler
    describe_counter!(
        "quote_proxy_job_runs_total",
        "Scheduled job runs by outcome"
    );
    describe_counter!(
        "quote_proxy_jobs_disabled_total",
        "Jobs disabled after reaching their failure threshold"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Which cache store a metric refers to.
#[derive(Debug, Clone, Copy)]
pub enum StoreKind {
    /// Proxied responses.
    Response,
    /// History series.
    History,
}

impl StoreKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::History => "history",
        }
    }
}

/// Outcome label for upstream requests and job runs.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    /// Completed successfully.
    Success,
    /// Upstream answered with a non-success status.
    Status,
    /// Timed out.
    Timeout,
    /// Any other failure.
    Failure,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Status => "status",
            Self::Timeout => "timeout",
            Self::Failure => "failure",
        }
    }
}

/// Record a response cache lookup.
pub fn record_cache_lookup(hit: bool) {
    counter!(
        "quote_proxy_cache_lookups_total",
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

/// Record a capacity eviction.
pub fn record_cache_eviction(store: StoreKind) {
    counter!(
        "quote_proxy_cache_evictions_total",
        "store" => store.as_str()
    )
    .increment(1);
}

/// Record entries removed by a cleanup sweep.
pub fn record_cleanup_removed(count: usize) {
    counter!("quote_proxy_cache_cleanup_removed_total").increment(count as u64);
}

/// Update the entry count of a store.
#[allow(clippy::cast_precision_loss)]
pub fn set_cache_entries(store: StoreKind, count: usize) {
    gauge!(
        "quote_proxy_cache_entries",
        "store" => store.as_str()
    )
    .set(count as f64);
}

/// Record an upstream request.
pub fn record_upstream_request(api: &str, outcome: Outcome, duration: Duration) {
    counter!(
        "quote_proxy_upstream_requests_total",
        "api" => api.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "quote_proxy_upstream_request_seconds",
        "api" => api.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a history point.
pub fn record_history_append() {
    counter!("quote_proxy_history_appends_total").increment(1);
}

/// Record a history store failure.
pub fn record_persistence_failure(operation: &'static str) {
    counter!(
        "quote_proxy_persistence_failures_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record a scheduled job run.
pub fn record_job_run(job_id: &str, outcome: Outcome) {
    counter!(
        "quote_proxy_job_runs_total",
        "job" => job_id.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a job tripping its failure threshold.
pub fn record_job_disabled(job_id: &str) {
    counter!(
        "quote_proxy_jobs_disabled_total",
        "job" => job_id.to_string()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
