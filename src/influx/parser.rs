//! Single-line decoder for the InfluxDB line protocol.
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! See <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>.

use super::{FieldValue, LineError, LineErrorKind, Point};

const MEASUREMENT_ESCAPES: &[u8] = b", \\";
const KEY_ESCAPES: &[u8] = b",= \\";

/// Decode one line, without its terminating `\n`.
///
/// Returns `Ok(None)` for blank lines and `#` comments.
pub fn parse_line(line: &[u8]) -> Result<Option<Point>, LineError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut cur = Cursor { buf: line, pos: 0 };

    cur.skip_whitespace();
    match cur.peek() {
        None | Some(b'#') => return Ok(None),
        _ => {}
    }

    // ── Measurement ─────────────────────────────────────────────
    let start = cur.pos;
    let measurement = cur.token(b", ", MEASUREMENT_ESCAPES)?;
    if measurement.is_empty() {
        return Err(LineError::at(start, LineErrorKind::MissingMeasurement));
    }
    let measurement = utf8(measurement, start)?;

    // ── Tag set ─────────────────────────────────────────────────
    let mut tags: Vec<(String, String)> = Vec::new();
    while cur.eat(b',') {
        let key_at = cur.pos;
        let key = cur.token(b"=, ", KEY_ESCAPES)?;
        if key.is_empty() {
            return Err(LineError::at(key_at, LineErrorKind::MissingTagKey));
        }
        let key = utf8(key, key_at)?;
        if !cur.eat(b'=') {
            return Err(LineError::at(cur.pos, LineErrorKind::MissingTagValue(key)));
        }

        let value_at = cur.pos;
        let value = cur.token(b", ", KEY_ESCAPES)?;
        if value.is_empty() {
            return Err(LineError::at(value_at, LineErrorKind::MissingTagValue(key)));
        }
        let value = utf8(value, value_at)?;

        if tags.iter().any(|(k, _)| *k == key) {
            return Err(LineError::at(key_at, LineErrorKind::DuplicateTag(key)));
        }
        tags.push((key, value));
    }

    // ── Field set ───────────────────────────────────────────────
    if !cur.eat(b' ') {
        return Err(LineError::at(cur.pos, LineErrorKind::MissingFields));
    }
    cur.skip_spaces();
    if cur.at_end() {
        return Err(LineError::at(cur.pos, LineErrorKind::MissingFields));
    }

    let mut fields: Vec<(String, FieldValue)> = Vec::new();
    loop {
        let key_at = cur.pos;
        let key = cur.token(b"=, ", KEY_ESCAPES)?;
        if key.is_empty() {
            return Err(LineError::at(key_at, LineErrorKind::MissingFieldKey));
        }
        let key = utf8(key, key_at)?;
        if !cur.eat(b'=') {
            return Err(LineError::at(cur.pos, LineErrorKind::MissingFieldValue(key)));
        }

        let value_at = cur.pos;
        let value = if cur.eat(b'"') {
            FieldValue::String(utf8(cur.quoted(value_at)?, value_at)?)
        } else {
            let raw = cur.until(b", ");
            if raw.is_empty() {
                return Err(LineError::at(value_at, LineErrorKind::MissingFieldValue(key)));
            }
            let raw = utf8(raw.to_vec(), value_at)?;
            match parse_field_value(&raw) {
                Some(value) => value,
                None => {
                    return Err(LineError::at(value_at, LineErrorKind::InvalidFieldValue(raw)));
                }
            }
        };

        if fields.iter().any(|(k, _)| *k == key) {
            return Err(LineError::at(key_at, LineErrorKind::DuplicateField(key)));
        }
        fields.push((key, value));

        match cur.peek() {
            Some(b',') => cur.pos += 1,
            None | Some(b' ') => break,
            Some(_) => {
                return Err(LineError::at(cur.pos, LineErrorKind::TrailingCharacters));
            }
        }
    }

    // ── Timestamp ───────────────────────────────────────────────
    cur.skip_spaces();
    let timestamp = if cur.at_end() {
        None
    } else {
        let ts_at = cur.pos;
        let raw = utf8(cur.until(b" ").to_vec(), ts_at)?;
        // `i64::from_str` takes a leading `+`; line protocol does not.
        let ts = match raw.parse::<i64>() {
            Ok(ts) if !raw.starts_with('+') => ts,
            _ => return Err(LineError::at(ts_at, LineErrorKind::InvalidTimestamp(raw))),
        };
        cur.skip_spaces();
        if !cur.at_end() {
            return Err(LineError::at(cur.pos, LineErrorKind::TrailingCharacters));
        }
        Some(ts)
    };

    Ok(Some(Point {
        measurement,
        tags,
        fields,
        timestamp,
    }))
}

fn parse_field_value(raw: &str) -> Option<FieldValue> {
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Some(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Some(FieldValue::Boolean(false)),
        _ => {}
    }
    if let Some(int) = raw.strip_suffix('i') {
        return int.parse().ok().map(FieldValue::Integer);
    }
    if let Some(uint) = raw.strip_suffix('u') {
        return uint.parse().ok().map(FieldValue::UInteger);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(FieldValue::Float)
}

fn utf8(bytes: Vec<u8>, column: usize) -> Result<String, LineError> {
    String::from_utf8(bytes).map_err(|_| LineError::at(column, LineErrorKind::InvalidUtf8))
}

// ─── Cursor ──────────────────────────────────────────────────────

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    /// Raw bytes up to the next byte in `stop`; no escape handling.
    fn until(&mut self, stop: &[u8]) -> &'a [u8] {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if stop.contains(&b) {
                break;
            }
            self.pos += 1;
        }
        &self.buf[start..self.pos]
    }

    /// Unescaped bytes up to the next unescaped byte in `stop`.
    ///
    /// A backslash before a byte in `escapes` yields that byte; before any
    /// other byte it is kept literally.
    fn token(&mut self, stop: &[u8], escapes: &[u8]) -> Result<Vec<u8>, LineError> {
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            if b == b'\\' {
                match self.buf.get(self.pos + 1) {
                    None => return Err(LineError::at(self.pos, LineErrorKind::DanglingEscape)),
                    Some(&next) if escapes.contains(&next) => {
                        out.push(next);
                        self.pos += 2;
                    }
                    Some(_) => {
                        out.push(b);
                        self.pos += 1;
                    }
                }
                continue;
            }
            if stop.contains(&b) {
                break;
            }
            out.push(b);
            self.pos += 1;
        }
        Ok(out)
    }

    /// Body of a double-quoted string; the opening quote is already consumed.
    fn quoted(&mut self, opened_at: usize) -> Result<Vec<u8>, LineError> {
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            match b {
                b'"' => {
                    self.pos += 1;
                    return Ok(out);
                }
                b'\\' if matches!(self.buf.get(self.pos + 1), Some(b'"' | b'\\')) => {
                    out.push(self.buf[self.pos + 1]);
                    self.pos += 2;
                }
                _ => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
        Err(LineError::at(opened_at, LineErrorKind::UnterminatedString))
    }
}
