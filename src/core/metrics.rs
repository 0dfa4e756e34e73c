//! Prometheus metrics for monitoring the studio proxy server.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    GaugeVec, HistogramVec, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, endpoint, and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Latency until upstream response headers arrive, by provider
    pub upstream_latency: HistogramVec,

    /// Upstream-related failures by provider and error category
    pub upstream_errors: IntCounterVec,

    /// Text fragments relayed to clients by streaming routes
    pub stream_fragments: IntCounterVec,

    /// Streams abandoned by the client before the upstream finished
    pub client_disconnects_total: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Safe to call repeatedly; every call returns the same instance.
///
/// # Examples
///
/// ```no_run
/// use studio_proxy_rust::core::metrics::init_metrics;
///
/// let metrics = init_metrics();
/// metrics.request_count.with_label_values(&["GET", "/health", "200"]).inc();
/// ```
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "studio_proxy_requests_total",
            "Total number of requests",
            &["method", "endpoint", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "studio_proxy_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "studio_proxy_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let upstream_latency = register_histogram_vec!(
            "studio_proxy_upstream_latency_seconds",
            "Time until upstream response headers arrive, in seconds",
            &["provider"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
        )
        .expect("Failed to register upstream_latency metric");

        let upstream_errors = register_int_counter_vec!(
            "studio_proxy_upstream_errors_total",
            "Upstream call failures by provider and category",
            &["provider", "category"]
        )
        .expect("Failed to register upstream_errors metric");

        let stream_fragments = register_int_counter_vec!(
            "studio_proxy_stream_fragments_total",
            "Text fragments relayed to clients",
            &["provider"]
        )
        .expect("Failed to register stream_fragments metric");

        let client_disconnects_total = register_int_counter!(
            "studio_proxy_client_disconnects_total",
            "Streams abandoned by the client before completion"
        )
        .expect("Failed to register client_disconnects metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            upstream_latency,
            upstream_errors,
            stream_fragments,
            client_disconnects_total,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = init_metrics();
        let metrics2 = get_metrics();
        assert!(std::ptr::eq(metrics, metrics2));
    }

    #[test]
    fn test_upstream_error_counter() {
        let metrics = init_metrics();
        let counter = metrics
            .upstream_errors
            .with_label_values(&["unit-test-provider", "transport"]);
        let initial = counter.get();
        counter.inc();
        assert_eq!(counter.get(), initial + 1);
    }

    #[test]
    fn test_request_duration_metric() {
        let metrics = init_metrics();
        let histogram = metrics
            .request_duration
            .with_label_values(&["POST", "/unit-test/duration"]);
        histogram.observe(1.5);
        histogram.observe(2.5);
        assert_eq!(histogram.get_sample_count(), 2);
    }
}
