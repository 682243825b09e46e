use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const ORG_ID_HEADER: &str = "x-scope-orgid";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Per-request identity and cancellation, built once at the edge and read by
/// the handler and the write client. Nothing downstream of the parser sees it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
    /// Cancelled when the request future is dropped before it completes.
    ///
    /// Under the server, dropping the future is what aborts in-flight parsing
    /// and writing; the guard fires only after the handler future is gone.
    /// Awaiting the token is therefore how tests and callers that cancel
    /// explicitly reach the `Cancelled` paths of the parser and forwarder.
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let trace_id = header_str(headers, TRACEPARENT_HEADER)
            .and_then(trace_id_from_traceparent)
            .or_else(|| header_str(headers, REQUEST_ID_HEADER).map(str::to_owned))
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        Self {
            trace_id,
            org_id: header_str(headers, ORG_ID_HEADER).map(str::to_owned),
            user_id: header_str(headers, USER_ID_HEADER).map(str::to_owned),
            cancel: CancellationToken::new(),
        }
    }

    /// Context for code paths that do not originate from an HTTP request.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self::from_headers(&HeaderMap::new())
    }
}

/// Builds the [`RequestContext`], stores it in the request extensions and runs
/// the rest of the stack inside a span carrying its identifiers.
pub async fn request_context(mut req: Request, next: Next) -> Response {
    let ctx = RequestContext::from_headers(req.headers());

    let span = tracing::info_span!(
        "request",
        trace_id = %ctx.trace_id,
        org_id = ctx.org_id.as_deref().unwrap_or("-"),
        user_id = ctx.user_id.as_deref().unwrap_or("-"),
    );

    // Dropping this guard (client went away) cancels the token after the
    // inner future has been dropped; a completed request disarms it.
    let guard = ctx.cancel.clone().drop_guard();
    req.extensions_mut().insert(ctx);

    let response = next.run(req).instrument(span).await;
    guard.disarm();
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `version-traceid-parentid-flags`, e.g.
/// `00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01`.
fn trace_id_from_traceparent(value: &str) -> Option<String> {
    let mut parts = value.split('-');
    let _version = parts.next()?;
    let trace_id = parts.next()?;
    let valid = trace_id.len() == 32
        && trace_id.bytes().all(|b| b.is_ascii_hexdigit())
        && trace_id.bytes().any(|b| b != b'0');
    valid.then(|| trace_id.to_ascii_lowercase())
}
