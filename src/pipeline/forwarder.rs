use std::time::Instant;

use axum::http::StatusCode;

use crate::metrics::Recorder;
use crate::middleware::context::RequestContext;
use crate::remote_write::{WriteClient, WriteError, WriteRequest};

/// Submit `batch` through `client`, racing it against the request's
/// cancellation. Returns the number of series written.
///
/// On cancellation the in-flight write future is dropped, which aborts the
/// underlying call.
pub async fn forward(
    client: &dyn WriteClient,
    batch: &WriteRequest,
    ctx: &RequestContext,
    recorder: &dyn Recorder,
) -> Result<usize, WriteError> {
    let started = Instant::now();

    let outcome = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(WriteError::Cancelled),
        outcome = client.write(batch, ctx) => outcome,
    };

    let status = match &outcome {
        Ok(()) => StatusCode::OK,
        Err(err) => err.status(),
    };
    recorder.measure_write_duration(status, started.elapsed());

    outcome.map(|()| batch.timeseries.len())
}
