use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::DurationSummary;
use super::Recorder;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 5 min, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 300_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Process-wide [`Recorder`] built once in `main` and shared via `AppState`.
///
/// Sample counts are plain atomics. Durations go into histograms behind
/// short-lived locks; nothing else is held while they are taken.
pub struct MetricsCollector {
    metrics_parsed: AtomicU64,
    metrics_dropped: AtomicU64,
    metrics_written: AtomicU64,

    conversion: Mutex<Histogram<u64>>,
    writes: Mutex<StatusTimings>,
    requests: Mutex<StatusTimings>,

    started: Instant,
}

/// Read-only view served by `GET /api/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub metrics_parsed: u64,
    pub metrics_dropped: u64,
    pub metrics_written: u64,

    pub conversion_duration: DurationSummary,
    pub write_duration: DurationSummary,
    pub request_duration: DurationSummary,

    /// Write-client calls per resulting status code.
    pub writes_by_status: BTreeMap<u16, u64>,
    /// Inbound requests per response status code.
    pub requests_by_status: BTreeMap<u16, u64>,

    pub requests_per_sec: f64,
    pub uptime_secs: f64,
}

// ─── Internal state ──────────────────────────────────────────────

struct StatusTimings {
    hist: Histogram<u64>,
    by_status: BTreeMap<u16, u64>,
}

impl StatusTimings {
    fn new() -> Self {
        Self {
            hist: new_histogram(),
            by_status: BTreeMap::new(),
        }
    }

    fn record(&mut self, status: StatusCode, duration: Duration) {
        record_duration(&mut self.hist, duration);
        *self.by_status.entry(status.as_u16()).or_default() += 1;
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG).expect("histogram creation")
}

/// Clamp to the histogram range so nothing is silently rejected.
fn record_duration(hist: &mut Histogram<u64>, duration: Duration) {
    let us = (duration.as_micros() as u64).clamp(HIST_LOW, HIST_HIGH);
    let _ = hist.record(us);
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics_parsed: AtomicU64::new(0),
            metrics_dropped: AtomicU64::new(0),
            metrics_written: AtomicU64::new(0),
            conversion: Mutex::new(new_histogram()),
            writes: Mutex::new(StatusTimings::new()),
            requests: Mutex::new(StatusTimings::new()),
            started: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime_secs = self.started.elapsed().as_secs_f64();
        let conversion_duration = DurationSummary::from_histogram(&self.conversion.lock());

        let (write_duration, writes_by_status) = {
            let writes = self.writes.lock();
            (
                DurationSummary::from_histogram(&writes.hist),
                writes.by_status.clone(),
            )
        };
        let (request_duration, requests_by_status) = {
            let requests = self.requests.lock();
            (
                DurationSummary::from_histogram(&requests.hist),
                requests.by_status.clone(),
            )
        };

        let requests_per_sec = if uptime_secs > 0.0 {
            request_duration.count as f64 / uptime_secs
        } else {
            0.0
        };

        MetricsSnapshot {
            metrics_parsed: self.metrics_parsed.load(Ordering::Relaxed),
            metrics_dropped: self.metrics_dropped.load(Ordering::Relaxed),
            metrics_written: self.metrics_written.load(Ordering::Relaxed),
            conversion_duration,
            write_duration,
            request_duration,
            writes_by_status,
            requests_by_status,
            requests_per_sec,
            uptime_secs,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder for MetricsCollector {
    fn measure_metrics_parsed(&self, count: usize) {
        self.metrics_parsed.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn measure_metrics_dropped(&self, count: usize) {
        self.metrics_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn measure_metrics_written(&self, count: usize) {
        self.metrics_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn measure_conversion_duration(&self, duration: Duration) {
        record_duration(&mut self.conversion.lock(), duration);
    }

    fn measure_write_duration(&self, status: StatusCode, duration: Duration) {
        self.writes.lock().record(status, duration);
    }

    fn measure_request(&self, status: StatusCode, duration: Duration) {
        self.requests.lock().record(status, duration);
    }
}
