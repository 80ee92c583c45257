//! Time and text helpers shared by every parser.
//!
//! - Timestamp parsing for ISO-8601 instants, Unix `date` stamps and compact
//!   `YYYYMMDD_HHMMSS` file-name stamps
//! - ANSI escape stripping and bounded truncation
//! - Deployment-name derivation from Kubernetes pod names
//! - [`LineReader`], a lossy async line reader

use std::borrow::Cow;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::{IngestError, Result};

/// Width of a timeline bucket in seconds (five minutes).
pub const BUCKET_SECONDS: i64 = 300;

/// Read buffer size for archive files.
const READ_BUFFER_BYTES: usize = 64 * 1024;

static ANSI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").unwrap_or_else(|_| unreachable!())
});

static FILE_STAMP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{8})_(\d{6})").unwrap_or_else(|_| unreachable!()));

/// Parses an ISO-8601 instant.
///
/// Accepts RFC 3339 (`2024-01-15T10:30:00.123Z`, offsets), a space instead of
/// the `T` separator, and zone-less values, which are taken as UTC.
#[must_use]
pub fn parse_iso8601(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = s
        .strip_suffix('Z')
        .or_else(|| s.strip_suffix('z'))
        .unwrap_or(s);
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc());
        }
    }

    None
}

/// Parses the output of the Unix `date` command, e.g. `Mon Jan 15 10:30:00 UTC 2024`.
///
/// Zone abbreviations cannot be resolved reliably, so every stamp is read as UTC.
#[must_use]
pub fn parse_date_stamp(input: &str) -> Option<DateTime<Utc>> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let normalized = match tokens.as_slice() {
        [dow, mon, day, time, year] => format!("{dow} {mon} {day} {time} {year}"),
        [dow, mon, day, time, _zone, year] => format!("{dow} {mon} {day} {time} {year}"),
        _ => return None,
    };

    NaiveDateTime::parse_from_str(&normalized, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Extracts a `YYYYMMDD_HHMMSS` stamp from a file name, e.g. `metrics_20240115_103000.txt`.
#[must_use]
pub fn parse_file_stamp(name: &str) -> Option<DateTime<Utc>> {
    let caps = FILE_STAMP_REGEX.captures(name)?;
    let joined = format!("{}{}", &caps[1], &caps[2]);
    NaiveDateTime::parse_from_str(&joined, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Tries every supported timestamp format in turn.
#[must_use]
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    parse_iso8601(input)
        .or_else(|| parse_date_stamp(input))
        .or_else(|| parse_file_stamp(input))
}

/// Parses an ISO-8601 command-line bound, reporting the offending input on failure.
pub fn parse_bound(input: &str) -> Result<DateTime<Utc>> {
    parse_iso8601(input).ok_or_else(|| IngestError::InvalidTimestamp(input.to_string()))
}

/// Floors a timestamp to the start of its bucket.
#[must_use]
pub fn bucket_start(ts: DateTime<Utc>, width_seconds: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(width_seconds);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

/// Removes ANSI color and OSC escape sequences.
#[must_use]
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    if line.contains('\x1b') {
        ANSI_REGEX.replace_all(line, "")
    } else {
        Cow::Borrowed(line)
    }
}

/// Truncates to at most `max_chars` characters, marking the cut with `…`.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some(_) if max_chars == 0 => String::new(),
        Some(_) => {
            let cut = text
                .char_indices()
                .nth(max_chars - 1)
                .map_or(text.len(), |(idx, _)| idx);
            let mut out = text[..cut].to_string();
            out.push('…');
            out
        }
    }
}

/// Derives the owning workload name from a pod name.
///
/// `api-7d9f8c6b5-x2x4q` (Deployment) becomes `api`, `redis-0` (StatefulSet)
/// becomes `redis`, and `fluentd-x7k2p` (DaemonSet) becomes `fluentd`. Names
/// that do not follow a controller pattern are returned unchanged.
#[must_use]
pub fn deployment_from_pod(pod: &str) -> String {
    let parts: Vec<&str> = pod.split('-').collect();
    let n = parts.len();

    if n >= 3 && is_pod_suffix(parts[n - 1]) && is_template_hash(parts[n - 2]) {
        return parts[..n - 2].join("-");
    }
    if n >= 2 && is_pod_suffix(parts[n - 1]) && parts[n - 1].chars().any(|c| c.is_ascii_digit()) {
        return parts[..n - 1].join("-");
    }
    if n >= 2 && !parts[n - 1].is_empty() && parts[n - 1].chars().all(|c| c.is_ascii_digit()) {
        return parts[..n - 1].join("-");
    }

    pod.to_string()
}

fn is_pod_suffix(segment: &str) -> bool {
    segment.len() == 5
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn is_template_hash(segment: &str) -> bool {
    (6..=10).contains(&segment.len())
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && segment.chars().any(|c| c.is_ascii_digit())
}

/// Async line reader that tolerates invalid UTF-8.
///
/// Each call to [`LineReader::next_line`] is a suspension point; only one line
/// is buffered at a time.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl LineReader<File> {
    /// Opens a file for line-by-line reading.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .map_err(|source| IngestError::io(path, source))?;
        Ok(Self::new(file))
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wraps any async reader.
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_BYTES, reader),
            buf: Vec::with_capacity(1024),
        }
    }

    /// Reads the next line without its terminator, replacing invalid UTF-8.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        let read = self.inner.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}
