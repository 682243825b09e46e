//! Prometheus remote-write messages and the client that ships them.
//!
//! The messages are written by hand instead of generated from
//! `prometheus/prompb/*.proto`: the write path only needs the four types
//! below, and their field tags match the upstream definitions.

pub mod client;

pub use client::{HttpWriteClient, WriteClient, WriteError};

/// Label carrying the metric identity.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// One batch submitted to the backend in a single call.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TimeSeries {
    /// Sorted by name, unique.
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Unix milliseconds.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

impl TimeSeries {
    /// Value of the `__name__` label, or `""` when missing.
    pub fn metric_name(&self) -> &str {
        self.label(METRIC_NAME_LABEL).unwrap_or_default()
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
