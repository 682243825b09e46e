use std::time::Duration;

use tracing::info;

use crate::remote_write::TimeSeries;

/// Outcome of the freshness filter.
#[derive(Debug, Default)]
pub struct Filtered {
    pub kept: Vec<TimeSeries>,
    pub dropped: usize,
}

/// Keep series whose samples lie in `[now - max_age, now]`.
///
/// A zero `max_age` disables the filter. Dropped series are only counted, and
/// logged when `log_dropped` is set.
pub fn filter_stale(
    series: Vec<TimeSeries>,
    max_age: Duration,
    now_ms: i64,
    log_dropped: bool,
) -> Filtered {
    if max_age.is_zero() {
        return Filtered {
            kept: series,
            dropped: 0,
        };
    }

    let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    let oldest = now_ms.saturating_sub(max_age_ms);

    let mut dropped = 0;
    let kept = series
        .into_iter()
        .filter(|s| {
            let fresh = s
                .samples
                .iter()
                .all(|sample| (oldest..=now_ms).contains(&sample.timestamp));
            if !fresh {
                dropped += 1;
                if log_dropped {
                    info!(
                        metric = s.metric_name(),
                        timestamp_ms = s.samples.first().map(|x| x.timestamp),
                        now_ms,
                        max_age_ms,
                        "dropping sample outside the accepted age window"
                    );
                }
            }
            fresh
        })
        .collect();

    Filtered { kept, dropped }
}
