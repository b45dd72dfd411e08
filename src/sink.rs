//! External collaborator contracts (spec §1/§6): the logger sink and the
//! metrics sink. Both are out-of-scope *subsystems* -- no backend is shipped
//! -- but the seams themselves are part of the ambient stack every worker
//! and the pool call into, so they live in core rather than behind a
//! feature flag.

use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a single log line handed to a [`LogSink`] (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Exception,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Exception => "EXCEPTION",
        };
        f.write_str(s)
    }
}

/// A `(level, wall_timestamp_iso8601, message)` sink. The core never
/// inspects a sink's state, only calls it; implementations must be
/// thread-safe, since any worker thread may log concurrently.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, timestamp_iso8601: &str, message: &str);
}

/// Formats `SystemTime::now()` as an ISO-8601 UTC timestamp without pulling
/// in a date/time crate the rest of the stack doesn't otherwise need.
pub fn now_iso8601() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();
    let days = secs / 86_400;
    let time_of_day = secs % 86_400;
    let (hour, minute, second) = (time_of_day / 3600, (time_of_day / 60) % 60, time_of_day % 60);
    let (year, month, day) = civil_from_days(days as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z"
    )
}

/// Howard Hinnant's days-from-civil algorithm, run in reverse: converts a
/// day count since the Unix epoch into a (year, month, day) triple. Avoids a
/// chrono dependency for what is otherwise a one-off formatting need.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// A [`LogSink`] that discards everything -- the default for a pool that
/// doesn't want the external-facing log contract, as distinct from the
/// `log` crate instrumentation used for internal dev diagnostics.
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _level: LogLevel, _timestamp_iso8601: &str, _message: &str) {}
}

/// A [`LogSink`] that buffers every call, for asserting on log output in
/// tests.
#[derive(Default)]
pub struct VecLogSink {
    lines: Mutex<Vec<(LogLevel, String, String)>>,
}

impl VecLogSink {
    pub fn new() -> Self {
        VecLogSink::default()
    }

    /// A snapshot of every line recorded so far, in call order.
    pub fn snapshot(&self) -> Vec<(LogLevel, String, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl LogSink for VecLogSink {
    fn log(&self, level: LogLevel, timestamp_iso8601: &str, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((level, timestamp_iso8601.to_string(), message.to_string()));
    }
}

/// One counter/gauge/histogram observation handed to a [`MetricsSink`]
/// (spec §6). `name` follows the well-known `pool.<title>.*` vocabulary
/// named in the spec; the core never validates it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram(f64),
}

/// A named-metric observer. No export format or backend is assumed --
/// callers wire this into whatever collector they already run (spec §1:
/// "metrics collection facade" is an external collaborator).
pub trait MetricsSink: Send + Sync {
    fn observe(&self, name: &str, value: MetricValue);
}

/// A [`MetricsSink`] that discards every observation.
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn observe(&self, _name: &str, _value: MetricValue) {}
}

/// A [`MetricsSink`] that buffers every observation, for asserting on
/// metrics emission in tests.
#[derive(Default)]
pub struct VecMetricsSink {
    observations: Mutex<Vec<(String, MetricValue)>>,
}

impl VecMetricsSink {
    pub fn new() -> Self {
        VecMetricsSink::default()
    }

    /// A snapshot of every observation recorded so far, in call order.
    pub fn snapshot(&self) -> Vec<(String, MetricValue)> {
        self.observations.lock().unwrap().clone()
    }
}

impl MetricsSink for VecMetricsSink {
    fn observe(&self, name: &str, value: MetricValue) {
        self.observations
            .lock()
            .unwrap()
            .push((name.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_timestamp_has_the_expected_shape() {
        let ts = now_iso8601();
        assert_eq!(ts.len(), "2026-07-28T00:00:00.000Z".len());
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.as_bytes()[4], b'-');
        assert_eq!(ts.as_bytes()[7], b'-');
        assert_eq!(ts.as_bytes()[10], b'T');
    }

    #[test]
    fn vec_log_sink_buffers_every_call() {
        let sink = VecLogSink::new();
        sink.log(LogLevel::Info, "2026-01-01T00:00:00.000Z", "hello");
        sink.log(LogLevel::Warn, "2026-01-01T00:00:01.000Z", "uh oh");
        let lines = sink.snapshot();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, LogLevel::Info);
        assert_eq!(lines[1].2, "uh oh");
    }

    #[test]
    fn vec_metrics_sink_buffers_every_observation() {
        let sink = VecMetricsSink::new();
        sink.observe("pool.default.jobs.submitted", MetricValue::Counter(1));
        sink.observe("pool.default.queue.depth", MetricValue::Gauge(3.0));
        let observed = sink.snapshot();
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[0].0, "pool.default.jobs.submitted");
    }
}
