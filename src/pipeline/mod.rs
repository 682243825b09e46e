//! Stages between the parser and the backend: freshness filtering, batch
//! assembly and forwarding.

pub mod filter;
pub mod forwarder;

use crate::remote_write::{TimeSeries, WriteRequest};

pub use filter::filter_stale;
pub use forwarder::forward;

/// Wrap series into one batch. An empty batch is still a valid write.
pub fn assemble(series: Vec<TimeSeries>) -> WriteRequest {
    WriteRequest { timeseries: series }
}
