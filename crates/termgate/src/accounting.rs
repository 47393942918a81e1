//! Connection accounting.
//!
//! Every session appends exactly one line to the connection log:
//!
//! ```text
//! [2024-05-01T12:00:00+02:00] IP: 203.0.113.7:51234 | Duration: 1m5s
//! ```
//!
//! The file is opened in append mode for each write and closed right after,
//! so external rotation is picked up by the next session. A [`SessionRecord`]
//! guard makes the write happen exactly once, including on early returns and
//! panics.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat, TimeDelta};

use crate::error::SessionError;
use crate::metrics::GatewayMetrics;

/// Permissions for a newly created connection log.
const LOG_FILE_MODE: u32 = 0o644;

/// One immutable connection log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// When the session started.
    pub start: DateTime<Local>,
    /// When the session ended.
    pub end: DateTime<Local>,
    /// Remote identity of the client, usually `ip:port`.
    pub remote_addr: String,
}

impl LogEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(start: DateTime<Local>, end: DateTime<Local>, remote_addr: impl Into<String>) -> Self {
        Self {
            start,
            end,
            remote_addr: remote_addr.into(),
        }
    }

    /// Session duration rounded to whole seconds, never negative.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(round_to_secs(self.end - self.start))
    }

    /// The log line, including the trailing newline.
    #[must_use]
    pub fn format_line(&self) -> String {
        format!(
            "[{}] IP: {} | Duration: {}\n",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.remote_addr,
            format_duration(self.duration().as_secs())
        )
    }
}

/// Round a time span to whole seconds, halves away from zero.
///
/// Negative spans (the wall clock stepped backwards) count as zero.
#[must_use]
pub fn round_to_secs(delta: TimeDelta) -> u64 {
    let millis = delta.num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    ((millis + 500) / 1000) as u64
}

/// Render whole seconds as `XhYmZs`, `YmZs` or `Zs`.
///
/// Leading zero units are omitted, inner ones are kept: `3600` renders as
/// `1h0m0s`.
#[must_use]
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Appends log entries to the connection log.
#[derive(Debug, Clone)]
pub struct Accountant {
    path: PathBuf,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl Accountant {
    /// Create an accountant writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metrics: None,
        }
    }

    /// Count write failures in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, opening and closing the file around the write.
    pub fn record(&self, entry: &LogEntry) -> Result<(), SessionError> {
        let line = entry.format_line();

        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .mode(LOG_FILE_MODE)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        result.map_err(|e| {
            if let Some(metrics) = &self.metrics {
                metrics.log_write_failures.inc();
            }
            SessionError::log_write(&self.path, e)
        })
    }

    /// Start accounting for a session that begins now.
    #[must_use]
    pub fn begin(&self, remote_addr: impl Into<String>) -> SessionRecord {
        SessionRecord {
            accountant: self.clone(),
            start: Local::now(),
            remote_addr: remote_addr.into(),
            written: false,
        }
    }
}

/// Writes a session's log entry exactly once.
///
/// Call [`finish`](Self::finish) on the normal path. If the record is dropped
/// without being finished, the entry is written from `Drop` with the drop
/// time as end time.
#[derive(Debug)]
#[must_use = "dropping the record immediately logs a zero-length session"]
pub struct SessionRecord {
    accountant: Accountant,
    start: DateTime<Local>,
    remote_addr: String,
    written: bool,
}

impl SessionRecord {
    /// When the session started.
    #[must_use]
    pub const fn start(&self) -> DateTime<Local> {
        self.start
    }

    /// Remote identity of the client.
    #[must_use]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// End the session now and write its entry.
    pub fn finish(mut self) -> Result<LogEntry, SessionError> {
        let (entry, result) = self.write_now();
        result.map(|()| entry)
    }

    fn write_now(&mut self) -> (LogEntry, Result<(), SessionError>) {
        self.written = true;
        let entry = LogEntry::new(self.start, Local::now(), self.remote_addr.clone());
        let result = self.accountant.record(&entry);
        (entry, result)
    }
}

impl Drop for SessionRecord {
    fn drop(&mut self) {
        if self.written {
            return;
        }

        let (entry, result) = self.write_now();
        if let Err(e) = result {
            tracing::warn!(
                remote = %entry.remote_addr,
                error = %e,
                "failed to record session"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64, millis: u32) -> DateTime<Local> {
        Local
            .timestamp_opt(1_700_000_000 + secs, millis * 1_000_000)
            .single()
            .unwrap()
    }

    #[test]
    fn format_duration_units() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(7), "7s");
        assert_eq!(format_duration(60), "1m0s");
        assert_eq!(format_duration(65), "1m5s");
        assert_eq!(format_duration(3600), "1h0m0s");
        assert_eq!(format_duration(3723), "1h2m3s");
        assert_eq!(format_duration(90_000), "25h0m0s");
    }

    #[test]
    fn round_half_away_from_zero() {
        assert_eq!(round_to_secs(TimeDelta::milliseconds(499)), 0);
        assert_eq!(round_to_secs(TimeDelta::milliseconds(500)), 1);
        assert_eq!(round_to_secs(TimeDelta::milliseconds(1_499)), 1);
        assert_eq!(round_to_secs(TimeDelta::milliseconds(1_500)), 2);
        assert_eq!(round_to_secs(TimeDelta::milliseconds(-3_000)), 0);
    }

    #[test]
    fn entry_line_format() {
        let entry = LogEntry::new(at(0, 0), at(65, 200), "203.0.113.7:51234");
        let line = entry.format_line();

        let expected_start = at(0, 0).to_rfc3339_opts(SecondsFormat::Secs, true);
        assert_eq!(
            line,
            format!("[{expected_start}] IP: 203.0.113.7:51234 | Duration: 1m5s\n")
        );
    }

    #[test]
    fn record_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        let accountant = Accountant::new(&path);

        accountant
            .record(&LogEntry::new(at(0, 0), at(3, 0), "10.0.0.1:1"))
            .unwrap();
        accountant
            .record(&LogEntry::new(at(10, 0), at(10, 0), "10.0.0.2:2"))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("IP: 10.0.0.1:1 | Duration: 3s"));
        assert!(lines[1].ends_with("IP: 10.0.0.2:2 | Duration: 0s"));
    }

    #[test]
    fn record_creates_with_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.log");
        Accountant::new(&path)
            .record(&LogEntry::new(at(0, 0), at(0, 0), "x"))
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        // The process umask may only clear bits.
        assert_eq!(mode & !LOG_FILE_MODE & 0o777, 0);
    }

    #[test]
    fn record_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(GatewayMetrics::new());
        let accountant = Accountant::new(dir.path().join("missing/dir/connections.log"))
            .with_metrics(Arc::clone(&metrics));

        let err = accountant
            .record(&LogEntry::new(at(0, 0), at(1, 0), "x"))
            .unwrap_err();
        assert!(matches!(err, SessionError::LogWrite { .. }));
        assert_eq!(metrics.log_write_failures.get(), 1);
    }

    #[test]
    fn session_record_writes_once_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        let accountant = Accountant::new(&path);

        let record = accountant.begin("192.0.2.1:2222");
        assert_eq!(record.remote_addr(), "192.0.2.1:2222");
        let entry = record.finish().unwrap();

        assert_eq!(entry.duration(), Duration::ZERO);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert_eq!(contents, entry.format_line());
    }

    #[test]
    fn session_record_writes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        let accountant = Accountant::new(&path);

        {
            let _record = accountant.begin("192.0.2.1:2222");
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("IP: 192.0.2.1:2222 | Duration: 0s"));
    }

    #[test]
    fn session_record_writes_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        let accountant = Accountant::new(&path);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _record = accountant.begin("198.51.100.9:40000");
            panic!("session blew up");
        }));
        assert!(result.is_err());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    proptest! {
        #[test]
        fn duration_matches_rounded_span(start in 0i64..1_000_000, span_ms in 0i64..100_000_000) {
            let start_time = at(start, 0);
            let end_time = start_time + TimeDelta::milliseconds(span_ms);
            let entry = LogEntry::new(start_time, end_time, "p");

            let secs = entry.duration().as_secs();
            prop_assert_eq!(secs as i64, (span_ms + 500) / 1000);
            prop_assert!((secs as i64 * 1000 - span_ms).abs() <= 500);
        }

        #[test]
        fn formatted_duration_parses_back(secs in 0u64..1_000_000) {
            let text = format_duration(secs);
            prop_assert!(text.ends_with('s'));

            let mut total = 0u64;
            let mut number = 0u64;
            for ch in text.chars() {
                match ch {
                    '0'..='9' => number = number * 10 + u64::from(ch.to_digit(10).unwrap()),
                    'h' => { total += number * 3600; number = 0; }
                    'm' => { total += number * 60; number = 0; }
                    's' => { total += number; number = 0; }
                    other => prop_assert!(false, "unexpected char {}", other),
                }
            }
            prop_assert_eq!(total, secs);
        }
    }
}
