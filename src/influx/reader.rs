//! Bounded, streaming decode of a request body.
//!
//! Chunks are pulled from the body one at a time and fed to a
//! [`LineDecoder`], which decodes every line as soon as its newline arrives.
//! The byte ceiling is checked per chunk, so an oversized body is rejected
//! without buffering it.

use std::io::Write;

use axum::body::Bytes;
use flate2::write::GzDecoder;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::convert::point_to_series;
use super::parser::parse_line;
use super::{LineErrorKind, ParseError, Precision};
use crate::clock::Clock;
use crate::remote_write::TimeSeries;

/// Compressed input is fed to the inflater in slices of this size, bounding
/// how much output one step can produce before the ceiling is checked again.
const INFLATE_STEP: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Ceiling on (decompressed) body bytes.
    pub max_size: usize,
    pub precision: Precision,
    pub encoding: ContentEncoding,
}

/// Series decoded from one request body.
#[derive(Debug, Default)]
pub struct Parsed {
    pub series: Vec<TimeSeries>,
    /// Body bytes consumed, after decompression.
    pub bytes_read: usize,
}

/// Decode a whole body stream. All-or-nothing: any error discards the series
/// decoded so far.
///
/// `max_size` bounds both the bytes pulled off the wire and the bytes they
/// inflate to.
pub async fn parse_stream<S, E>(
    body: S,
    options: ParseOptions,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<Parsed, ParseError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut decoder = LineDecoder::new(options, clock);
    let mut inflater = match options.encoding {
        ContentEncoding::Identity => None,
        ContentEncoding::Gzip => Some(GzDecoder::new(Vec::new())),
    };

    let mut raw_read = 0usize;
    tokio::pin!(body);
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ParseError::Cancelled),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| ParseError::Body(e.into()))?;

        match inflater.as_mut() {
            None => decoder.push(&chunk)?,
            Some(inflater) => {
                raw_read += chunk.len();
                if raw_read > options.max_size {
                    return Err(ParseError::TooLarge {
                        limit: options.max_size,
                    });
                }
                for piece in chunk.chunks(INFLATE_STEP) {
                    inflater.write_all(piece).map_err(ParseError::Decompress)?;
                    decoder.push(&std::mem::take(inflater.get_mut()))?;
                }
            }
        }
    }

    if let Some(inflater) = inflater {
        let rest = inflater.finish().map_err(ParseError::Decompress)?;
        decoder.push(&rest)?;
    }
    decoder.finish()
}

// ─── Line decoder ────────────────────────────────────────────────

/// Push-side of the parser: accepts arbitrary byte slices, decodes complete
/// lines eagerly and keeps the unterminated tail for the next push.
pub struct LineDecoder<'a> {
    options: ParseOptions,
    clock: &'a dyn Clock,
    /// Bytes of the current, not yet terminated line.
    pending: Vec<u8>,
    /// Absolute offset of `pending[0]` in the body.
    pending_offset: usize,
    /// 1-based number of the line held in `pending`.
    line: usize,
    bytes_read: usize,
    series: Vec<TimeSeries>,
}

impl<'a> LineDecoder<'a> {
    pub fn new(options: ParseOptions, clock: &'a dyn Clock) -> Self {
        Self {
            options,
            clock,
            pending: Vec::new(),
            pending_offset: 0,
            line: 1,
            bytes_read: 0,
            series: Vec::new(),
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if data.is_empty() {
            return Ok(());
        }
        self.bytes_read += data.len();
        if self.bytes_read > self.options.max_size {
            return Err(ParseError::TooLarge {
                limit: self.options.max_size,
            });
        }

        let mut buf = std::mem::take(&mut self.pending);
        let scan_from = buf.len();
        buf.extend_from_slice(data);

        let mut start = 0;
        let mut search = scan_from;
        while let Some(nl) = buf[search..].iter().position(|&b| b == b'\n') {
            let end = search + nl;
            self.decode_line(&buf[start..end])?;
            self.line += 1;
            self.pending_offset += end + 1 - start;
            start = end + 1;
            search = start;
        }

        buf.drain(..start);
        self.pending = buf;
        Ok(())
    }

    /// Decode the trailing line, if any, and hand over everything decoded.
    pub fn finish(mut self) -> Result<Parsed, ParseError> {
        let tail = std::mem::take(&mut self.pending);
        self.decode_line(&tail)?;
        Ok(Parsed {
            series: self.series,
            bytes_read: self.bytes_read,
        })
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line_no = self.line;
        let line_offset = self.pending_offset;
        let syntax = |column: usize, kind: LineErrorKind| ParseError::Syntax {
            line: line_no,
            offset: line_offset + column,
            kind,
        };

        let point = parse_line(line).map_err(|e| syntax(e.column, e.kind))?;
        if let Some(point) = point {
            let series = point_to_series(point, self.options.precision, self.clock)
                .map_err(|kind| syntax(0, kind))?;
            self.series.extend(series);
        }
        Ok(())
    }
}
