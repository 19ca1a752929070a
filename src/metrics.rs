use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all metrics of this crate
const PREFIX: &str = "pubsub_jobs";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Transport Metrics
    pub static ref TRANSPORT_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_transport_requests_total"), "Total number of transport requests"),
        &["operation", "status"]
    ).expect("Failed to create transport_requests_total metric");

    pub static ref TRANSPORT_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_transport_request_duration_seconds"),
            "Transport request duration in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["operation"]
    ).expect("Failed to create transport_request_duration_seconds metric");

    // Long-running job Metrics
    pub static ref DEADLINE_RENEWALS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_deadline_renewals_total"), "Ack deadline renewals by outcome"),
        &["status"]
    ).expect("Failed to create deadline_renewals_total metric");

    pub static ref ACTIVE_LONG_RUNNING_JOBS: Gauge = Gauge::new(
        format!("{PREFIX}_active_long_running_jobs"),
        "Number of long-running jobs whose deadline is being renewed"
    ).expect("Failed to create active_long_running_jobs metric");

    pub static ref LONG_RUNNING_JOBS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_long_running_jobs_total"), "Long-running job lifecycle events"),
        &["event"]
    ).expect("Failed to create long_running_jobs_total metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(TRANSPORT_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TRANSPORT_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DEADLINE_RENEWALS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_LONG_RUNNING_JOBS.clone()));
    let _ = REGISTRY.register(Box::new(LONG_RUNNING_JOBS_TOTAL.clone()));

    tracing::debug!("Metrics registered");
}

pub fn record_transport_call(operation: &str, status: &str, duration: Duration) {
    TRANSPORT_REQUESTS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    TRANSPORT_REQUEST_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

pub fn record_renewal(success: bool) {
    let status = if success { "success" } else { "failure" };
    DEADLINE_RENEWALS_TOTAL.with_label_values(&[status]).inc();
}

/// Lifecycle events: "started", "empty", "acknowledged", "cancelled", "nacked".
pub fn record_job_event(event: &str) {
    LONG_RUNNING_JOBS_TOTAL.with_label_values(&[event]).inc();
}

/// The gauge is shared by every scheduler in the process, so schedulers only
/// ever adjust it by the registrations they add or remove.
pub fn inc_active_jobs() {
    ACTIVE_LONG_RUNNING_JOBS.inc();
}

pub fn dec_active_jobs(count: usize) {
    if count > 0 {
        ACTIVE_LONG_RUNNING_JOBS.sub(count as f64);
    }
}

pub fn active_jobs() -> f64 {
    ACTIVE_LONG_RUNNING_JOBS.get()
}

/// Text exposition of every registered metric.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_metrics() {
        init_metrics();
        record_renewal(true);
        record_job_event("started");
        record_transport_call("pull", "200", Duration::from_millis(12));

        let text = render();
        assert!(text.contains("pubsub_jobs_deadline_renewals_total"));
        assert!(text.contains("pubsub_jobs_long_running_jobs_total"));
        assert!(text.contains("pubsub_jobs_transport_requests_total"));
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
    }
}
