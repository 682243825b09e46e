pub mod collector;
pub mod endpoint;
pub mod percentiles;

use std::time::Duration;

use axum::http::StatusCode;

pub use collector::MetricsCollector;

/// Passive sink for what the write pipeline observes.
///
/// Every method is infallible and cheap: recording must never fail a request
/// nor serialize concurrent ones.
pub trait Recorder: Send + Sync {
    /// Series decoded from a request body.
    fn measure_metrics_parsed(&self, count: usize);
    /// Series removed by the freshness filter.
    fn measure_metrics_dropped(&self, count: usize);
    /// Series accepted by the backend.
    fn measure_metrics_written(&self, count: usize);
    /// Time spent turning the body into series.
    fn measure_conversion_duration(&self, duration: Duration);
    /// One call into the write client, keyed by the status it resolved to.
    fn measure_write_duration(&self, status: StatusCode, duration: Duration);
    /// One inbound request, keyed by the status it was answered with.
    fn measure_request(&self, status: StatusCode, duration: Duration);
}
