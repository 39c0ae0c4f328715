//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define service metrics (HTTP traffic, calculator calls, errors)
//! - Aggregate across worker processes through a shared directory
//! - Expose Prometheus-compatible text for the scrape endpoint
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, endpoint, status
//! - `http_request_duration_seconds` (histogram): latency by method, endpoint
//! - `calculator_calls_total` (counter): calculator invocations by function
//! - `calculator_call_duration_seconds` (summary): invocation latency by function
//! - `calculator_call_errors_total` (counter): failures by function, error type
//!
//! # Design Decisions
//! - One segment file per process, no cross-process locking
//! - Scrape merges every segment present at read time (best-effort snapshot)
//! - Recording never fails a request; storage trouble degrades to no-ops

pub mod exposition;
pub mod registry;
pub mod segment;
pub mod series;

pub use registry::{MetricsError, MetricsRegistry};
pub use series::{MetricsSnapshot, SeriesKey, SeriesValue};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const CALCULATOR_CALLS_TOTAL: &str = "calculator_calls_total";
pub const CALCULATOR_CALL_DURATION_SECONDS: &str = "calculator_call_duration_seconds";
pub const CALCULATOR_CALL_ERRORS_TOTAL: &str = "calculator_call_errors_total";

/// Buckets tuned for request latencies up to the outer timeout.
pub const HTTP_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Buckets for histograms recorded through the `metrics` facade.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Storage shape of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricKind {
    Counter,
    Histogram(&'static [f64]),
    Summary,
}

/// A metric declared up front with its help text and label schema.
#[derive(Debug, Clone, Copy)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

pub static DESCRIPTORS: [MetricDescriptor; 5] = [
    MetricDescriptor {
        name: HTTP_REQUESTS_TOTAL,
        help: "Total number of HTTP requests",
        kind: MetricKind::Counter,
        labels: &["method", "endpoint", "status"],
    },
    MetricDescriptor {
        name: HTTP_REQUEST_DURATION_SECONDS,
        help: "HTTP request duration in seconds",
        kind: MetricKind::Histogram(HTTP_DURATION_BUCKETS),
        labels: &["method", "endpoint"],
    },
    MetricDescriptor {
        name: CALCULATOR_CALLS_TOTAL,
        help: "Total number of calculator invocations",
        kind: MetricKind::Counter,
        labels: &["function"],
    },
    MetricDescriptor {
        name: CALCULATOR_CALL_DURATION_SECONDS,
        help: "Calculator invocation duration in seconds",
        kind: MetricKind::Summary,
        labels: &["function"],
    },
    MetricDescriptor {
        name: CALCULATOR_CALL_ERRORS_TOTAL,
        help: "Number of failed calculator invocations",
        kind: MetricKind::Counter,
        labels: &["function", "error_type"],
    },
];

/// Look up a declared metric.
pub fn descriptor(name: &str) -> Option<&'static MetricDescriptor> {
    DESCRIPTORS.iter().find(|d| d.name == name)
}
