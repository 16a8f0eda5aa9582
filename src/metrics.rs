//! Prometheus metrics for the task event flow
//!
//! Counters follow the flow end to end: events published, events received per
//! consumer and outcome, duplicates absorbed, notifications sent, successors
//! created. No user or task ids in labels.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Request Metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "taskflow_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "endpoint", "status"]
    ).unwrap();

    /// Total HTTP requests
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("taskflow_http_requests_total", "Total HTTP requests"),
        &["method", "endpoint", "status"]
    ).unwrap();

    // ============================================================================
    // Event Flow Metrics
    // ============================================================================

    /// Completion events published (result = ok | failed)
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("taskflow_events_published_total", "task.completed publish attempts"),
        &["result"]
    ).unwrap();

    /// Deliveries handled per consumer and outcome
    pub static ref EVENTS_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("taskflow_events_received_total", "task.completed deliveries handled"),
        &["consumer", "outcome"]
    ).unwrap();

    /// Redeliveries absorbed by an existing marker
    pub static ref DUPLICATES_SKIPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("taskflow_duplicates_skipped_total", "Actions skipped because a marker already existed"),
        &["consumer"]
    ).unwrap();

    /// Notifications emitted by kind
    pub static ref NOTIFICATIONS_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("taskflow_notifications_sent_total", "Notifications emitted"),
        &["kind"]
    ).unwrap();

    /// Successor tasks created for recurring tasks
    pub static ref RECURRING_TASKS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "taskflow_recurring_tasks_created_total",
        "Next-instance tasks created by the recurrence engine"
    ).unwrap();

    /// Sidecar call latency per operation
    pub static ref SIDECAR_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "taskflow_sidecar_request_duration_seconds",
            "Sidecar request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["operation"]
    ).unwrap();
}

/// Register all metrics with the global registry
///
/// Safe to call more than once; later calls report `AlreadyReg` which is ignored.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(EVENTS_PUBLISHED_TOTAL.clone()),
        Box::new(EVENTS_RECEIVED_TOTAL.clone()),
        Box::new(DUPLICATES_SKIPPED_TOTAL.clone()),
        Box::new(NOTIFICATIONS_SENT_TOTAL.clone()),
        Box::new(RECURRING_TASKS_CREATED_TOTAL.clone()),
        Box::new(SIDECAR_REQUEST_DURATION.clone()),
    ];

    for collector in collectors {
        match METRICS_REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Encode the registry in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
