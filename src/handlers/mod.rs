pub mod write;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::influx::ParseError;
use crate::remote_write::WriteError;

/// Non-standard "client closed request" status, as used by nginx. Only ever
/// seen in logs and metrics since nobody is left to receive it.
pub fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}

// ─── Unified error type ──────────────────────────────────────────

/// Every way a write request can fail.
///
/// Responses never carry a body: simple agents treat any body on a write as
/// a failure, so the detail only goes to the server log.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("unsupported precision {0:?}")]
    InvalidPrecision(String),

    #[error("unsupported content encoding {0:?}")]
    UnsupportedEncoding(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse(ParseError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Parse(ParseError::Cancelled) => client_closed_request(),
            Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::Write(err) => err.status(),
            Self::InvalidPrecision(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedEncoding(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}

// ─── GET /ready ──────────────────────────────────────────────────

pub async fn ready() -> StatusCode {
    StatusCode::OK
}
