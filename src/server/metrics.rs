use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all backup metrics
const PREFIX: &str = "pezzottify_backup";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Backup cycle metrics
    pub static ref BACKUP_CYCLES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cycles_total"), "Total backup cycles by outcome"),
        &["status"]
    ).expect("Failed to create cycles_total metric");

    pub static ref BACKUP_CYCLE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_cycle_duration_seconds"),
            "Backup cycle duration in seconds"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0])
    ).expect("Failed to create cycle_duration_seconds metric");

    pub static ref BACKUP_ARCHIVE_SIZE_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_archive_size_bytes"),
        "Size of the most recently produced archive in bytes"
    ).expect("Failed to create archive_size_bytes metric");

    // Retention metrics
    pub static ref RETENTION_SWEEPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_retention_sweeps_total"), "Total retention sweeps by outcome"),
        &["status"]
    ).expect("Failed to create retention_sweeps_total metric");

    pub static ref RETENTION_DELETED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_retention_deleted_total"),
        "Total archives deleted by the retention policy"
    ).expect("Failed to create retention_deleted_total metric");

    pub static ref RETENTION_DELETE_ERRORS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_retention_delete_errors_total"),
        "Total expired archives that could not be deleted"
    ).expect("Failed to create retention_delete_errors_total metric");

    // Notification metrics
    pub static ref NOTIFICATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_notifications_total"), "Total notifications by event and outcome"),
        &["event", "status"]
    ).expect("Failed to create notifications_total metric");

    // Background job metrics
    pub static ref JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_job_running"), "Whether a background job is currently running"),
        &["job_id"]
    ).expect("Failed to create job_running metric");

    pub static ref JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_executions_total"), "Total background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create job_executions_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
        &["job_id"]
    ).expect("Failed to create job_duration_seconds metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(BACKUP_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKUP_CYCLE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKUP_ARCHIVE_SIZE_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(RETENTION_SWEEPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RETENTION_DELETED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RETENTION_DELETE_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(NOTIFICATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record the outcome of a backup cycle
pub fn record_backup_cycle(status: &str, duration: Duration) {
    BACKUP_CYCLES_TOTAL.with_label_values(&[status]).inc();
    BACKUP_CYCLE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn set_last_archive_size(size_bytes: u64) {
    BACKUP_ARCHIVE_SIZE_BYTES.set(size_bytes as f64);
}

pub fn record_retention_sweep(status: &str) {
    RETENTION_SWEEPS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_retention_deleted() {
    RETENTION_DELETED_TOTAL.inc();
}

pub fn record_retention_delete_error() {
    RETENTION_DELETE_ERRORS_TOTAL.inc();
}

/// Record a notification attempt
pub fn record_notification(event: &str, status: &str) {
    NOTIFICATIONS_TOTAL.with_label_values(&[event, status]).inc();
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Record a finished background job execution
pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
