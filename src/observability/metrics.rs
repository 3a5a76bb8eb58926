use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the idempotency stage.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    /// A request that carried no key, or arrived with no store wired in.
    pub fn record_passthrough(&self) {
        counter!("idempotency_passthrough_total").increment(1);
    }

    /// A cached response was returned without invoking downstream.
    pub fn record_replay(&self) {
        counter!("idempotency_replays_total").increment(1);
    }

    /// Downstream executed and its response was persisted.
    pub fn record_execution(&self) {
        counter!("idempotency_executions_total").increment(1);
    }

    pub fn record_rate_limited(&self) {
        counter!("idempotency_rate_limited_total").increment(1);
    }

    pub fn record_capture_overflow(&self) {
        counter!("idempotency_capture_overflow_total").increment(1);
    }

    pub fn record_store_error(&self, operation: &str) {
        counter!("idempotency_store_errors_total", "operation" => operation.to_string())
            .increment(1);
    }

    pub fn record_lookup_latency(&self, duration_ms: f64, hit: bool) {
        histogram!("idempotency_lookup_duration_ms", "hit" => hit.to_string())
            .record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the metrics system and returns the Prometheus handle.
pub fn init_metrics() -> PrometheusHandle {
    let handle = METRICS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        describe_metrics();
        handle
    });

    METRICS.get_or_init(Metrics::new);

    handle.clone()
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!(
        "idempotency_passthrough_total",
        Unit::Count,
        "Requests handled without idempotency coordination"
    );
    describe_counter!(
        "idempotency_replays_total",
        Unit::Count,
        "Cached responses replayed without downstream execution"
    );
    describe_counter!(
        "idempotency_executions_total",
        Unit::Count,
        "Downstream executions whose responses were persisted"
    );
    describe_counter!(
        "idempotency_rate_limited_total",
        Unit::Count,
        "Requests denied by the per-key admission window"
    );
    describe_counter!(
        "idempotency_capture_overflow_total",
        Unit::Count,
        "Responses delivered uncached because the body exceeded the capture ceiling"
    );
    describe_counter!(
        "idempotency_store_errors_total",
        Unit::Count,
        "Store calls that failed and were bypassed"
    );
    describe_histogram!(
        "idempotency_lookup_duration_ms",
        Unit::Milliseconds,
        "Store lookup latency in milliseconds"
    );
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
