use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use prost::Message;
use tracing::debug;

use super::WriteRequest;
use crate::middleware::context::RequestContext;

/// Longest backend response body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

const REMOTE_WRITE_VERSION: &str = "0.1.0";

// ─── Outcome classification ──────────────────────────────────────

/// Why a write did not succeed. The split between client and server faults
/// decides which status the proxy hands back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The backend rejected the batch (4xx: bad data, limits, throttling).
    #[error("remote write rejected with {status}: {message}")]
    ClientFault { status: StatusCode, message: String },

    /// The backend or the path to it failed (5xx, unreachable, timed out).
    #[error("remote write failed with {status}: {message}")]
    ServerFault { status: StatusCode, message: String },

    /// The inbound request went away while the write was in flight.
    #[error("remote write cancelled")]
    Cancelled,
}

impl WriteError {
    /// Classify a non-success backend response.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let message = truncate(body.trim(), MAX_ERROR_BODY).to_owned();
        if status.is_client_error() {
            Self::ClientFault { status, message }
        } else if status.is_server_error() {
            Self::ServerFault { status, message }
        } else {
            // Redirects and informational codes are not something a write
            // endpoint should answer with.
            Self::ServerFault {
                status: StatusCode::BAD_GATEWAY,
                message: format!("unexpected backend status {status}: {message}"),
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ClientFault { status, .. } | Self::ServerFault { status, .. } => *status,
            Self::Cancelled => crate::handlers::client_closed_request(),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Client seam ─────────────────────────────────────────────────

/// Capability to submit one batch to the remote-write backend.
///
/// Implementations must be safe to share between concurrent requests; the
/// proxy never serializes access.
#[async_trait]
pub trait WriteClient: Send + Sync {
    async fn write(&self, request: &WriteRequest, ctx: &RequestContext) -> Result<(), WriteError>;
}

// ─── HTTP implementation ─────────────────────────────────────────

/// Remote-write client speaking snappy-compressed protobuf over HTTP.
///
/// `reqwest::Client` pools connections internally and is cheap to share.
pub struct HttpWriteClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpWriteClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_http_client(http, endpoint))
    }

    pub fn with_http_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WriteClient for HttpWriteClient {
    async fn write(&self, request: &WriteRequest, ctx: &RequestContext) -> Result<(), WriteError> {
        let encoded = request.encode_to_vec();
        let compressed = snap::raw::Encoder::new()
            .compress_vec(&encoded)
            .map_err(|e| WriteError::ServerFault {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("snappy encode: {e}"),
            })?;

        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/x-protobuf")
            .header(header::CONTENT_ENCODING, "snappy")
            .header("X-Prometheus-Remote-Write-Version", REMOTE_WRITE_VERSION)
            .header("X-Request-Id", ctx.trace_id.as_str());
        if let Some(org_id) = &ctx.org_id {
            builder = builder.header("X-Scope-OrgID", org_id.as_str());
        }

        let response = builder
            .body(compressed)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, bytes = encoded.len(), "remote write accepted");
            return Ok(());
        }

        let body = read_error_body(response).await;
        Err(WriteError::from_response(status, &body))
    }
}

/// Read no more of a rejection body than ends up in the error message.
async fn read_error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    body.truncate(MAX_ERROR_BODY);
    String::from_utf8_lossy(&body).into_owned()
}

fn transport_error(err: reqwest::Error) -> WriteError {
    let status = if err.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::BAD_GATEWAY
    };
    WriteError::ServerFault {
        status,
        message: err.to_string(),
    }
}
