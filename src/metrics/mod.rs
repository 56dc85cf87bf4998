//! Prometheus metrics for roundkeeper
//!
//! This module provides metrics tracking for:
//! - Lifecycle: ticks by phase, tick duration, snapshot pushes, entry flow
//! - Background infrastructure: scheduled task runs, RPC requests by
//!   endpoint, limiter deferrals, lock attempts
//! - Admin API: requests by endpoint and status
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec, CounterVec,
    Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Round lifecycle and admin API metrics
struct LifecycleMetrics {
    ticks: CounterVec,
    tick_duration: Histogram,
    current_round: Gauge,
    snapshot_size: Gauge,
    snapshots_pushed: CounterVec,
    entries: CounterVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

/// Scheduler, RPC, limiter and lock metrics
struct InfraMetrics {
    task_runs: CounterVec,
    rpc_requests: CounterVec,
    limiter_deferrals: CounterVec,
    limiter_delay_seconds: CounterVec,
    lock_attempts: CounterVec,
}

static LIFECYCLE_METRICS: OnceLock<LifecycleMetrics> = OnceLock::new();

static INFRA_METRICS: OnceLock<InfraMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Call once at startup. Later calls return `Ok(())` without registering
/// anything. When registration fails every recording function stays a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = roundkeeper::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let lifecycle = LifecycleMetrics {
        ticks: register_counter_vec!(
            "roundkeeper_lifecycle_ticks_total",
            "Lifecycle ticks by observed phase",
            &["phase"]
        )?,
        tick_duration: register_histogram!(
            "roundkeeper_lifecycle_tick_duration_seconds",
            "Time spent in one lifecycle tick",
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 180.0]
        )?,
        current_round: register_gauge!(
            "roundkeeper_lifecycle_current_round",
            "Current round number on the ledger"
        )?,
        snapshot_size: register_gauge!(
            "roundkeeper_lifecycle_snapshot_size",
            "Number of entries in the most recent snapshot"
        )?,
        snapshots_pushed: register_counter_vec!(
            "roundkeeper_lifecycle_snapshots_total",
            "Freeze steps completed, by result (pushed or empty)",
            &["result"]
        )?,
        entries: register_counter_vec!(
            "roundkeeper_entries_total",
            "Entry changes by kind (ingested, verified, unverified, purged)",
            &["kind"]
        )?,
        api_requests: register_counter_vec!(
            "roundkeeper_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "roundkeeper_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let infra = InfraMetrics {
        task_runs: register_counter_vec!(
            "roundkeeper_task_runs_total",
            "Scheduled task invocations by outcome",
            &["task", "outcome"]
        )?,
        rpc_requests: register_counter_vec!(
            "roundkeeper_rpc_requests_total",
            "Ledger RPC attempts by endpoint, kind and outcome",
            &["endpoint", "kind", "outcome"]
        )?,
        limiter_deferrals: register_counter_vec!(
            "roundkeeper_limiter_deferrals_total",
            "Token bucket grants that had to wait",
            &["bucket"]
        )?,
        limiter_delay_seconds: register_counter_vec!(
            "roundkeeper_limiter_delay_seconds_total",
            "Total time spent waiting on token buckets",
            &["bucket"]
        )?,
        lock_attempts: register_counter_vec!(
            "roundkeeper_lock_attempts_total",
            "Distributed lock attempts by result",
            &["lock", "result"]
        )?,
    };

    LIFECYCLE_METRICS
        .set(lifecycle)
        .map_err(|_| "Lifecycle metrics already initialized")?;
    INFRA_METRICS
        .set(infra)
        .map_err(|_| "Infrastructure metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    LIFECYCLE_METRICS.get().is_some() && INFRA_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
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

pub fn start_tick_timer() -> MetricsTimer {
    match LIFECYCLE_METRICS.get() {
        Some(m) => MetricsTimer::new(m.tick_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

pub fn record_tick(phase: &str) {
    if let Some(m) = LIFECYCLE_METRICS.get() {
        m.ticks.with_label_values(&[phase]).inc();
    }
}

pub fn set_current_round(round: u64) {
    if let Some(m) = LIFECYCLE_METRICS.get() {
        m.current_round.set(round as f64);
    }
}

/// Record a completed freeze step
pub fn record_snapshot(size: usize, pushed: bool) {
    let Some(m) = LIFECYCLE_METRICS.get() else {
        return;
    };

    m.snapshot_size.set(size as f64);
    m.snapshots_pushed
        .with_label_values(&[if pushed { "pushed" } else { "empty" }])
        .inc();
}

pub fn record_entries(kind: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = LIFECYCLE_METRICS.get() {
        m.entries.with_label_values(&[kind]).inc_by(count as f64);
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = LIFECYCLE_METRICS.get() else {
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

// ============================================================================
// Infrastructure
// ============================================================================

pub fn record_task_run(task: &str, outcome: &str) {
    if let Some(m) = INFRA_METRICS.get() {
        m.task_runs.with_label_values(&[task, outcome]).inc();
    }
}

pub fn record_rpc_request(endpoint: &str, kind: &str, outcome: &str) {
    if let Some(m) = INFRA_METRICS.get() {
        m.rpc_requests
            .with_label_values(&[endpoint, kind, outcome])
            .inc();
    }
}

pub fn record_limiter_deferral(bucket: &str, delay_secs: f64) {
    let Some(m) = INFRA_METRICS.get() else {
        return;
    };

    m.limiter_deferrals.with_label_values(&[bucket]).inc();
    m.limiter_delay_seconds
        .with_label_values(&[bucket])
        .inc_by(delay_secs);
}

pub fn record_lock_attempt(lock: &str, acquired: bool) {
    if let Some(m) = INFRA_METRICS.get() {
        m.lock_attempts
            .with_label_values(&[lock, if acquired { "acquired" } else { "busy" }])
            .inc();
    }
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
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());

        record_tick("active");
        let text = encode_metrics().unwrap();
        assert!(text.contains("roundkeeper_lifecycle_ticks_total"));
    }

    #[test]
    fn test_recording_does_not_panic() {
        ensure_metrics_initialized();
        record_snapshot(12, true);
        record_snapshot(0, false);
        record_entries("ingested", 3);
        record_entries("purged", 0);
        record_task_run("mention-poller", "success");
        record_rpc_request("http://rpc-a", "call", "ok");
        record_limiter_deferral("mentions", 0.25);
        record_lock_attempt("round-creation", false);
        record_api_request("/api/status", 200, 0.002);
        set_current_round(4);
        let _timer = start_tick_timer();
    }
}
