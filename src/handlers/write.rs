use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    Extension,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::influx::{self, ContentEncoding, ParseError, ParseOptions, Precision};
use crate::metrics::Recorder;
use crate::middleware::context::RequestContext;
use crate::pipeline;
use crate::AppState;

use super::{client_closed_request, AppError};

// ─── Request parameters ──────────────────────────────────────────

/// Query string of an InfluxDB write. `db`, `bucket`, `org` and `rp` are
/// accepted for compatibility and ignored.
#[derive(Debug, Default, Deserialize)]
pub struct WriteParams {
    #[serde(default)]
    pub precision: Option<String>,
}

impl WriteParams {
    fn precision(&self) -> Result<Precision, AppError> {
        match self.precision.as_deref() {
            None => Ok(Precision::default()),
            Some(p) => p.parse().map_err(AppError::InvalidPrecision),
        }
    }
}

fn content_encoding(headers: &HeaderMap) -> Result<ContentEncoding, AppError> {
    let Some(value) = headers.get(header::CONTENT_ENCODING) else {
        return Ok(ContentEncoding::Identity);
    };
    let Ok(value) = value.to_str() else {
        return Err(AppError::UnsupportedEncoding(
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        ));
    };
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "" | "identity" => Ok(ContentEncoding::Identity),
        "gzip" | "x-gzip" => Ok(ContentEncoding::Gzip),
        _ => Err(AppError::UnsupportedEncoding(value)),
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

// ─── POST /api/v1/push/influx/write (and aliases) ────────────────

/// Accepts line protocol, converts it to remote-write series and forwards
/// them. Answers `204 No Content` on success: Telegraf treats anything with a
/// body as a failed write.
pub async fn write_influx(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<WriteParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, AppError> {
    match ingest(&state, &ctx, &params, &headers, body).await {
        Ok(written) => {
            debug!(len = written, "successful series write");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(err) => {
            log_failure(&err);
            Err(err)
        }
    }
}

/// `Parse → Filter → Assemble → Forward`, stopping at the first failure.
async fn ingest(
    state: &AppState,
    ctx: &RequestContext,
    params: &WriteParams,
    headers: &HeaderMap,
    body: Body,
) -> Result<usize, AppError> {
    let precision = params.precision()?;
    let encoding = content_encoding(headers)?;
    let max_size = state.config.max_request_size;

    // An honest Content-Length lets us refuse before reading anything.
    if encoding == ContentEncoding::Identity
        && content_length(headers).is_some_and(|len| len > max_size)
    {
        return Err(ParseError::TooLarge { limit: max_size }.into());
    }

    let recorder: &dyn Recorder = state.metrics.as_ref();
    let options = ParseOptions {
        max_size,
        precision,
        encoding,
    };

    // ── Parse ───────────────────────────────────────────────────
    let before_conversion = Instant::now();
    let parsed = influx::parse_stream(
        body.into_data_stream(),
        options,
        state.clock.as_ref(),
        &ctx.cancel,
    )
    .await;
    recorder.measure_conversion_duration(before_conversion.elapsed());
    let parsed = parsed?;
    recorder.measure_metrics_parsed(parsed.series.len());
    debug!(
        series = parsed.series.len(),
        bytes = parsed.bytes_read,
        "decoded line protocol"
    );

    // ── Filter ──────────────────────────────────────────────────
    let filtered = pipeline::filter_stale(
        parsed.series,
        state.config.max_sample_age,
        state.clock.now_ms(),
        state.config.log_dropped_samples,
    );
    recorder.measure_metrics_dropped(filtered.dropped);

    // ── Assemble + forward ──────────────────────────────────────
    let batch = pipeline::assemble(filtered.kept);
    let written = pipeline::forward(state.client.as_ref(), &batch, ctx, recorder).await?;
    recorder.measure_metrics_written(written);

    Ok(written)
}

fn log_failure(err: &AppError) {
    let status = err.status();
    if status == client_closed_request() {
        info!(error = %err, "request cancelled by the caller");
    } else if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "write request failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "write request rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::WriteConfig;
    use crate::metrics::MetricsCollector;
    use crate::remote_write::{WriteClient, WriteError, WriteRequest};
    use async_trait::async_trait;
    use axum::http::{HeaderValue, Request};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    const NOW_MS: i64 = 1_700_000_000_000;

    /// Records every batch and answers with a fixed outcome.
    struct FakeClient {
        outcome: Result<(), WriteError>,
        batches: Mutex<Vec<(WriteRequest, Option<String>)>>,
    }

    impl FakeClient {
        fn new(outcome: Result<(), WriteError>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<(WriteRequest, Option<String>)> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl WriteClient for FakeClient {
        async fn write(&self, request: &WriteRequest, ctx: &RequestContext) -> Result<(), WriteError> {
            self.batches
                .lock()
                .push((request.clone(), ctx.org_id.clone()));
            self.outcome.clone()
        }
    }

    struct Harness {
        app: axum::Router,
        client: Arc<FakeClient>,
        metrics: Arc<MetricsCollector>,
        clock: Arc<MockClock>,
    }

    fn harness(outcome: Result<(), WriteError>, config: WriteConfig) -> Harness {
        let client = FakeClient::new(outcome);
        let metrics = Arc::new(MetricsCollector::new());
        let clock = Arc::new(MockClock::at_ms(NOW_MS));
        let state = Arc::new(AppState {
            config,
            client: client.clone(),
            metrics: metrics.clone(),
            clock: clock.clone(),
        });
        Harness {
            app: crate::server::create_router(state),
            client,
            metrics,
            clock,
        }
    }

    fn config() -> WriteConfig {
        WriteConfig {
            max_request_size: 1024,
            max_sample_age: Duration::ZERO,
            log_dropped_samples: false,
        }
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::post(uri)
            .header("X-Scope-OrgID", "tenant-1")
            .body(body.into())
            .unwrap()
    }

    async fn send(h: &Harness, req: Request<Body>) -> axum::response::Response {
        h.app.clone().oneshot(req).await.unwrap()
    }

    async fn body_len(response: axum::response::Response) -> usize {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn writes_series_and_returns_no_content() {
        let h = harness(Ok(()), config());
        let response = send(
            &h,
            post(
                "/api/v1/push/influx/write",
                "cpu,host=a value=1 1000000000\nmem,host=a used=5i,free=7i 2000000000\n",
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(body_len(response).await, 0);

        let batches = h.client.batches();
        assert_eq!(batches.len(), 1);
        let (batch, org) = &batches[0];
        assert_eq!(org.as_deref(), Some("tenant-1"));
        let names: Vec<_> = batch.timeseries.iter().map(|s| s.metric_name()).collect();
        assert_eq!(names, vec!["cpu", "mem_used", "mem_free"]);
        assert_eq!(batch.timeseries[0].samples[0].timestamp, 1_000);

        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.metrics_parsed, 3);
        assert_eq!(snapshot.metrics_written, 3);
        assert_eq!(snapshot.metrics_dropped, 0);
        assert_eq!(snapshot.conversion_duration.count, 1);
        assert_eq!(snapshot.requests_by_status[&204], 1);
    }

    #[tokio::test]
    async fn all_write_paths_are_equivalent() {
        for path in crate::server::WRITE_PATHS {
            let h = harness(Ok(()), config());
            let response = send(&h, post(path, "cpu value=1")).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT, "{path}");
            assert_eq!(h.client.batches().len(), 1, "{path}");
        }
    }

    #[tokio::test]
    async fn missing_timestamp_uses_the_clock() {
        let h = harness(Ok(()), config());
        send(&h, post("/write", "cpu value=1\n")).await;
        let (batch, _) = &h.client.batches()[0];
        assert_eq!(batch.timeseries[0].samples[0].timestamp, NOW_MS);
    }

    #[tokio::test]
    async fn precision_parameter() {
        let h = harness(Ok(()), config());
        let response = send(&h, post("/api/v2/write?bucket=b&precision=s", "cpu value=1 1700000000")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let (batch, _) = &h.client.batches()[0];
        assert_eq!(batch.timeseries[0].samples[0].timestamp, 1_700_000_000_000);

        let response = send(&h, post("/write?precision=h", "cpu value=1 1")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(h.client.batches().len(), 1);
    }

    #[tokio::test]
    async fn syntax_error_is_bad_request_and_nothing_is_written() {
        let h = harness(Ok(()), config());
        for body in [",host=a value=1 1", "cpu value=abc 1", "cpu value=1 1\ncpu,host=a,host=b value=1"] {
            let response = send(&h, post("/write", body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(body_len(response).await, 0);
        }
        assert!(h.client.batches().is_empty());
        assert_eq!(h.metrics.snapshot().requests_by_status[&400], 3);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_forwarding() {
        let h = harness(Ok(()), config());
        let body = "cpu value=1\n".repeat(200);

        // Refused up front from Content-Length.
        let mut req = post("/write", body.clone());
        req.headers_mut()
            .insert(header::CONTENT_LENGTH, body.len().into());
        let response = send(&h, req).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        // Streamed without one.
        let chunks: Vec<Result<String, std::io::Error>> = vec![Ok(body.clone()), Ok(body)];
        let streamed = Body::from_stream(tokio_stream::iter(chunks));
        let response = send(&h, post("/write", streamed)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        assert!(h.client.batches().is_empty());
        assert_eq!(h.metrics.snapshot().metrics_parsed, 0);
    }

    #[tokio::test]
    async fn gzip_and_unsupported_encodings() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let h = harness(Ok(()), config());
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"cpu value=1 1000000\n").unwrap();
        let gz = encoder.finish().unwrap();

        let mut req = post("/write", gz);
        req.headers_mut()
            .insert(header::CONTENT_ENCODING, "gzip".parse().unwrap());
        assert_eq!(send(&h, req).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(h.client.batches().len(), 1);

        let mut req = post("/write", "cpu value=1");
        req.headers_mut()
            .insert(header::CONTENT_ENCODING, "br".parse().unwrap());
        assert_eq!(
            send(&h, req).await.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );

        // Opaque bytes are not mistaken for an absent header.
        let mut req = post("/write", "cpu value=1");
        req.headers_mut().insert(
            header::CONTENT_ENCODING,
            HeaderValue::from_bytes(b"gz\xffip").unwrap(),
        );
        assert_eq!(
            send(&h, req).await.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(h.client.batches().len(), 1);
    }

    #[tokio::test]
    async fn fully_dropped_batch_is_an_empty_successful_write() {
        let h = harness(
            Ok(()),
            WriteConfig {
                max_sample_age: Duration::from_secs(60),
                ..config()
            },
        );
        // Both samples are two minutes old.
        let old_ns = (NOW_MS - 120_000) * 1_000_000;
        let body = format!("cpu value=1 {old_ns}\nmem value=2 {old_ns}\n");

        let response = send(&h, post("/write", body)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let batches = h.client.batches();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].0.timeseries.is_empty());

        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.metrics_parsed, 2);
        assert_eq!(snapshot.metrics_dropped, 2);
        assert_eq!(snapshot.metrics_written, 0);
    }

    #[tokio::test]
    async fn stale_samples_are_filtered_out() {
        let h = harness(
            Ok(()),
            WriteConfig {
                max_sample_age: Duration::from_secs(60),
                ..config()
            },
        );
        let old_ns = (NOW_MS - 120_000) * 1_000_000;
        let fresh_ns = (NOW_MS - 30_000) * 1_000_000;
        let body = format!("old value=1 {old_ns}\nfresh value=2 {fresh_ns}\n");

        send(&h, post("/write", body.clone())).await;
        let (batch, _) = &h.client.batches()[0];
        let names: Vec<_> = batch.timeseries.iter().map(|s| s.metric_name()).collect();
        assert_eq!(names, vec!["fresh"]);

        // A minute later the same body has nothing fresh left.
        h.clock.advance(chrono::Duration::seconds(60));
        send(&h, post("/write", body)).await;
        let (batch, _) = &h.client.batches()[1];
        assert!(batch.timeseries.is_empty());
        assert_eq!(h.metrics.snapshot().metrics_dropped, 3);
    }

    #[tokio::test]
    async fn backend_statuses_are_relayed() {
        let cases = [
            (
                WriteError::ClientFault {
                    status: StatusCode::TOO_MANY_REQUESTS,
                    message: "rate limited".into(),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                WriteError::ClientFault {
                    status: StatusCode::BAD_REQUEST,
                    message: "out of bounds".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                WriteError::ServerFault {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    message: "down".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (fault, expected) in cases {
            let h = harness(Err(fault), config());
            let response = send(&h, post("/write", "cpu value=1")).await;
            assert_eq!(response.status(), expected);
            assert_eq!(body_len(response).await, 0);

            let snapshot = h.metrics.snapshot();
            assert_eq!(snapshot.metrics_written, 0);
            assert_eq!(snapshot.writes_by_status[&expected.as_u16()], 1);
        }
    }

    #[tokio::test]
    async fn metrics_and_ready_endpoints() {
        let h = harness(Ok(()), config());
        send(&h, post("/write", "cpu value=1")).await;

        let response = send(
            &h,
            Request::get("/ready").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key(crate::middleware::timing::RESPONSE_TIME_HEADER));
        assert!(response
            .headers()
            .get(crate::middleware::timing::SERVER_TIMING_HEADER)
            .is_some_and(|v| v.to_str().unwrap().starts_with("total;dur=")));

        let response = send(
            &h,
            Request::get("/api/metrics").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["metrics_written"], 1);
    }
}
