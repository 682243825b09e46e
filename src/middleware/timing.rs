use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::handlers::client_closed_request;
use crate::metrics::Recorder;
use crate::AppState;

pub const RESPONSE_TIME_HEADER: &str = "x-response-time-us";
pub const SERVER_TIMING_HEADER: &str = "server-timing";

/// Records every inbound request with the recorder and adds two response
/// headers:
///
///   X-Response-Time-Us: total handler wall time in microseconds
///   Server-Timing: same value in the standard Server-Timing format
///
/// A request whose future is dropped before completion is recorded as 499.
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let timer = RequestTimer::start(state.metrics.clone());
    let mut response = next.run(req).await;
    let elapsed = timer.finish(response.status());

    // ── Inject response headers ─────────────────────────────────
    let us = elapsed.as_micros();
    if let Ok(val) = HeaderValue::from_str(&us.to_string()) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, val);
    }
    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = HeaderValue::from_str(&server_timing) {
        response.headers_mut().insert(SERVER_TIMING_HEADER, val);
    }

    // Health and metrics polls would drown out writes.
    let status = response.status().as_u16();
    if path == "/ready" || path == "/api/metrics" {
        debug!(status, %method, path, us, "request finished");
    } else {
        info!(status, %method, path, us, "request finished");
    }

    response
}

/// Measures one request and records it exactly once, either through
/// [`RequestTimer::finish`] or, if the request future is dropped, from `Drop`.
struct RequestTimer {
    recorder: Arc<dyn Recorder>,
    started: Instant,
    finished: bool,
}

impl RequestTimer {
    fn start(recorder: Arc<dyn Recorder>) -> Self {
        Self {
            recorder,
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, status: StatusCode) -> Duration {
        self.finished = true;
        let elapsed = self.started.elapsed();
        self.recorder.measure_request(status, elapsed);
        elapsed
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        if !self.finished {
            let elapsed = self.started.elapsed();
            info!(us = elapsed.as_micros(), "request abandoned by the client");
            self.recorder.measure_request(client_closed_request(), elapsed);
        }
    }
}
