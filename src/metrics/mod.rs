//! Prometheus metrics for the punchup scheduler, collectors and pipeline
//!
//! This module provides metrics tracking for:
//! - Scheduler: ticks, jobs created, dispatch outcomes
//! - Collection: executions by status, active scrapers, scrape duration
//! - Processing: batches by outcome, records processed, stage completions
//! - API: request counts and latency
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Scheduler metrics
struct SchedulerMetrics {
    ticks: CounterVec,
    jobs_created: Counter,
    dispatches: CounterVec,
}

/// Collection and processing metrics
struct WorkerMetrics {
    executions: CounterVec,
    active_scrapers: Gauge,
    scrape_duration: HistogramVec,
    records_collected: Counter,
    batches: CounterVec,
    records_processed: Counter,
    stages_completed: CounterVec,
}

/// HTTP API metrics
struct ApiMetrics {
    requests: CounterVec,
    duration: HistogramVec,
}

static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = punchup::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let scheduler = SchedulerMetrics {
        ticks: register_counter_vec!(
            "punchup_scheduler_ticks_total",
            "Scheduler ticks by outcome",
            &["outcome"]
        )?,
        jobs_created: register_counter!(
            "punchup_scheduler_jobs_created_total",
            "Jobs created by scheduler ticks"
        )?,
        dispatches: register_counter_vec!(
            "punchup_scheduler_dispatches_total",
            "Job dispatch results",
            &["result"]
        )?,
    };

    let worker = WorkerMetrics {
        executions: register_counter_vec!(
            "punchup_collection_executions_total",
            "Finished executions by status",
            &["status"]
        )?,
        active_scrapers: register_gauge!(
            "punchup_collection_active_scrapers",
            "Scraper contexts currently open"
        )?,
        scrape_duration: register_histogram_vec!(
            "punchup_collection_scrape_duration_seconds",
            "Time spent collecting one job in seconds",
            &["source"],
            vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        records_collected: register_counter!(
            "punchup_collection_records_total",
            "Raw records produced by scrapers"
        )?,
        batches: register_counter_vec!(
            "punchup_processing_batches_total",
            "Processed batches by outcome",
            &["outcome"]
        )?,
        records_processed: register_counter!(
            "punchup_processing_records_total",
            "Raw records that went through a successful batch"
        )?,
        stages_completed: register_counter_vec!(
            "punchup_processing_stages_completed_total",
            "Stage completion events by state",
            &["state"]
        )?,
    };

    let api = ApiMetrics {
        requests: register_counter_vec!(
            "punchup_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        duration: register_histogram_vec!(
            "punchup_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        )?,
    };

    SCHEDULER_METRICS
        .set(scheduler)
        .map_err(|_| "Scheduler metrics already initialized")?;
    WORKER_METRICS
        .set(worker)
        .map_err(|_| "Worker metrics already initialized")?;
    API_METRICS
        .set(api)
        .map_err(|_| "API metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some() && WORKER_METRICS.get().is_some() && API_METRICS.get().is_some()
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

/// Record a scheduler tick (`completed`, `skipped` or `failed`)
pub fn record_tick(outcome: &str, jobs_created: usize) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    m.ticks.with_label_values(&[outcome]).inc();
    if jobs_created > 0 {
        m.jobs_created.inc_by(jobs_created as f64);
    }
}

/// Record a dispatch result
pub fn record_dispatch(success: bool) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        let result = if success { "dispatched" } else { "failed" };
        m.dispatches.with_label_values(&[result]).inc();
    }
}

/// Record a finished execution
pub fn record_execution(status: &str, records: usize) {
    let Some(m) = WORKER_METRICS.get() else {
        return;
    };

    m.executions.with_label_values(&[status]).inc();
    if records > 0 {
        m.records_collected.inc_by(records as f64);
    }
}

/// Track open scraper contexts
pub fn set_active_scrapers(active: usize) {
    if let Some(m) = WORKER_METRICS.get() {
        m.active_scrapers.set(active as f64);
    }
}

/// Record a processed batch
pub fn record_batch(success: bool, records: usize) {
    let Some(m) = WORKER_METRICS.get() else {
        return;
    };

    let outcome = if success { "persisted" } else { "failed" };
    m.batches.with_label_values(&[outcome]).inc();
    if success && records > 0 {
        m.records_processed.inc_by(records as f64);
    }
}

/// Record a stage completion event
pub fn record_stage_completed(state: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.stages_completed.with_label_values(&[state]).inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = API_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.duration
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

/// Start a scrape timer for one job
pub fn start_scrape_timer(source: &str) -> MetricsTimer {
    match WORKER_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.scrape_duration
                .with_label_values(&[source])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
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
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());

        // Second call is a no-op
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_tick("completed", 2);
        let text = encode_metrics().unwrap();
        assert!(text.contains("punchup_scheduler_ticks_total"));
    }

    #[test]
    fn test_recorders() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());
        record_dispatch(true);
        record_dispatch(false);
        record_execution("succeeded", 12);
        set_active_scrapers(3);
        record_batch(true, 50);
        record_batch(false, 3);
        record_stage_completed("validated");
        record_api_request("/health", 200, 0.002);
        let _timer = start_scrape_timer("punchup.live");
    }
}
