use std::collections::BTreeMap;

use super::{LineErrorKind, Point, Precision};
use crate::clock::Clock;
use crate::remote_write::{Label, Sample, TimeSeries, METRIC_NAME_LABEL};

/// Label stamped on every series so the backend can tell where it came from.
pub const PROXY_SOURCE_LABEL: &str = "__proxy_source__";
pub const PROXY_SOURCE: &str = "influx";

/// Field key that maps straight onto the measurement name.
const VALUE_FIELD: &str = "value";

/// Expand one point into one series per field.
///
/// Points without a timestamp are stamped with `clock` at the moment they are
/// converted, so every line carries its own arrival time.
pub fn point_to_series(
    point: Point,
    precision: Precision,
    clock: &dyn Clock,
) -> Result<Vec<TimeSeries>, LineErrorKind> {
    let timestamp = match point.timestamp {
        Some(ts) => precision
            .to_millis(ts)
            .ok_or(LineErrorKind::TimestampOutOfRange(ts))?,
        None => clock.now_ms(),
    };

    let mut base = BTreeMap::new();
    base.insert(PROXY_SOURCE_LABEL.to_owned(), PROXY_SOURCE.to_owned());
    for (key, value) in point.tags {
        let name = sanitize_label_name(&key);
        if name == METRIC_NAME_LABEL || base.insert(name, value).is_some() {
            return Err(LineErrorKind::LabelCollision(key));
        }
    }

    point
        .fields
        .into_iter()
        .map(|(field, value)| {
            let value = value
                .as_f64()
                .ok_or_else(|| LineErrorKind::NonNumericField(field.clone()))?;

            let mut labels = base.clone();
            labels.insert(
                METRIC_NAME_LABEL.to_owned(),
                metric_name(&point.measurement, &field),
            );

            Ok(TimeSeries {
                labels: labels
                    .into_iter()
                    .map(|(name, value)| Label { name, value })
                    .collect(),
                samples: vec![Sample { value, timestamp }],
            })
        })
        .collect()
}

/// `measurement` for the `value` field, `measurement_field` otherwise.
pub fn metric_name(measurement: &str, field: &str) -> String {
    if field == VALUE_FIELD {
        sanitize(measurement, true)
    } else {
        sanitize(&format!("{measurement}_{field}"), true)
    }
}

/// Restrict to `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn sanitize_label_name(name: &str) -> String {
    sanitize(name, false)
}

fn sanitize(name: &str, allow_colon: bool) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    for (i, c) in name.chars().enumerate() {
        let valid = c.is_ascii_alphabetic() || c == '_' || (allow_colon && c == ':');
        if valid || (i > 0 && c.is_ascii_digit()) {
            out.push(c);
        } else if c.is_ascii_digit() {
            out.push('_');
            out.push(c);
        } else {
            out.push('_');
        }
    }
    out
}
