//! InfluxDB line protocol → remote-write time series.
//!
//! [`parser`] decodes single lines into [`Point`]s, [`convert`] expands each
//! point into one series per field, and [`reader`] drives both over a bounded
//! stream of body chunks.

pub mod convert;
pub mod parser;
pub mod reader;

use std::fmt;
use std::str::FromStr;

pub use reader::{parse_stream, ContentEncoding, ParseOptions};

// ─── Line record ─────────────────────────────────────────────────

/// One decoded line, before field expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    /// In input order; keys are unique.
    pub tags: Vec<(String, String)>,
    /// In input order; keys are unique; never empty.
    pub fields: Vec<(String, FieldValue)>,
    /// Raw timestamp in the request precision.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    UInteger(u64),
    Boolean(bool),
    String(String),
}

impl FieldValue {
    /// Numeric view used as the sample value. Strings have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::UInteger(v) => Some(*v as f64),
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::String(_) => None,
        }
    }
}

// ─── Precision ───────────────────────────────────────────────────

/// Unit of the timestamps in a write request (`?precision=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl Precision {
    /// Convert a raw timestamp to Unix milliseconds, truncating sub-millisecond
    /// parts toward zero.
    pub fn to_millis(self, ts: i64) -> Option<i64> {
        match self {
            Self::Nanoseconds => Some(ts / 1_000_000),
            Self::Microseconds => Some(ts / 1_000),
            Self::Milliseconds => Some(ts),
            Self::Seconds => ts.checked_mul(1_000),
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "n" | "ns" => Ok(Self::Nanoseconds),
            "u" | "us" | "µs" => Ok(Self::Microseconds),
            "ms" => Ok(Self::Milliseconds),
            "s" => Ok(Self::Seconds),
            other => Err(other.to_owned()),
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────

/// What is wrong with a line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineErrorKind {
    #[error("missing measurement")]
    MissingMeasurement,
    #[error("missing tag key")]
    MissingTagKey,
    #[error("missing value for tag {0:?}")]
    MissingTagValue(String),
    #[error("duplicate tag {0:?}")]
    DuplicateTag(String),
    #[error("missing fields")]
    MissingFields,
    #[error("missing field key")]
    MissingFieldKey,
    #[error("missing value for field {0:?}")]
    MissingFieldValue(String),
    #[error("invalid field value {0:?}")]
    InvalidFieldValue(String),
    #[error("duplicate field {0:?}")]
    DuplicateField(String),
    #[error("field {0:?} is not numeric")]
    NonNumericField(String),
    #[error("unterminated string")]
    UnterminatedString,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("timestamp {0} out of range")]
    TimestampOutOfRange(i64),
    #[error("unexpected characters after value")]
    TrailingCharacters,
    #[error("backslash at end of line")]
    DanglingEscape,
    #[error("invalid UTF-8")]
    InvalidUtf8,
    #[error("tag {0:?} collides with another label after sanitizing")]
    LabelCollision(String),
}

/// A [`LineErrorKind`] at a byte column within its line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub kind: LineErrorKind,
    pub column: usize,
}

impl LineError {
    pub fn at(column: usize, kind: LineErrorKind) -> Self {
        Self { kind, column }
    }
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at column {}", self.kind, self.column)
    }
}

impl std::error::Error for LineError {}

/// Why a request body could not be turned into series.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Malformed line. `offset` is the absolute byte offset of the fault in
    /// the (decompressed) body.
    #[error("line {line}, byte offset {offset}: {kind}")]
    Syntax {
        line: usize,
        offset: usize,
        kind: LineErrorKind,
    },

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("invalid gzip body: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("failed to read request body: {0}")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("request cancelled while reading body")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_conversion() {
        assert_eq!(Precision::Nanoseconds.to_millis(1_000_000_000), Some(1_000));
        assert_eq!(Precision::Nanoseconds.to_millis(1_999_999), Some(1));
        assert_eq!(Precision::Microseconds.to_millis(1_500_000), Some(1_500));
        assert_eq!(Precision::Milliseconds.to_millis(42), Some(42));
        assert_eq!(Precision::Seconds.to_millis(60), Some(60_000));
        assert_eq!(Precision::Seconds.to_millis(i64::MAX), None);
    }

    #[test]
    fn precision_names() {
        assert_eq!("ns".parse(), Ok(Precision::Nanoseconds));
        assert_eq!("n".parse(), Ok(Precision::Nanoseconds));
        assert_eq!("us".parse(), Ok(Precision::Microseconds));
        assert_eq!("ms".parse(), Ok(Precision::Milliseconds));
        assert_eq!("s".parse(), Ok(Precision::Seconds));
        assert_eq!("h".parse::<Precision>(), Err("h".to_owned()));
    }

    #[test]
    fn syntax_error_message() {
        let err = ParseError::Syntax {
            line: 3,
            offset: 57,
            kind: LineErrorKind::DuplicateTag("host".into()),
        };
        assert_eq!(err.to_string(), r#"line 3, byte offset 57: duplicate tag "host""#);
    }
}
