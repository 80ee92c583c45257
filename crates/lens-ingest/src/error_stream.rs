//! Streaming parser for per-pod error logs.
//!
//! Record lines look like `[<pod>] <ISO-8601 timestamp> <message>`. Indented
//! `at ...` frames (and Python `File "..."` frames) that follow a record are
//! its stack trace. Files are read strictly one line at a time.

use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::classifier::{classify, extract_bot_id};
use crate::error::{IngestError, Result};
use crate::types::{FileStats, Level, LogEvent, TimeRange};
use crate::util::{LineReader, deployment_from_pod, parse_iso8601, strip_ansi, truncate_chars};

/// Maximum stored message length in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Maximum number of stack-trace lines kept per event.
pub const MAX_STACK_LINES: usize = 50;

/// Classification looks at no more than this many characters of a message.
const MAX_CLASSIFY_CHARS: usize = 2000;

/// Longest single stack frame kept.
const MAX_FRAME_CHARS: usize = 300;

static RECORD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(?P<pod>[^\]\s]+)\]\s+(?P<ts>\d{4}-\d{2}-\d{2}T\S+)\s*(?P<msg>.*)$")
        .unwrap_or_else(|_| unreachable!())
});

static CONTINUATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:\s+at\s|\s+File "|\s*Caused by:|\s+\.\.\. \d+ more)"#)
        .unwrap_or_else(|_| unreachable!())
});

static STACK_START_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)error|exception|traceback|panic").unwrap_or_else(|_| unreachable!())
});

/// Events and tallies parsed from one error-log file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedErrorLog {
    /// Events in file order.
    pub events: Vec<LogEvent>,
    /// Per-file tallies.
    pub stats: FileStats,
}

/// A record line held back until its stack trace (if any) is complete.
#[derive(Debug)]
struct PendingRecord {
    timestamp: Option<DateTime<Utc>>,
    pod: String,
    message: String,
    stack: Vec<String>,
    dropped_frames: usize,
}

/// Per-file parse state.
///
/// `pending` is the single slot that guarantees a stack trace is never split
/// across two events: it is flushed only when the next record line arrives or
/// the file ends.
#[derive(Debug)]
pub struct ErrorStreamState {
    range: TimeRange,
    pending: Option<PendingRecord>,
    output: ParsedErrorLog,
}

impl ErrorStreamState {
    /// Creates state for one file.
    #[must_use]
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            pending: None,
            output: ParsedErrorLog::default(),
        }
    }

    /// Feeds one raw line.
    pub fn process_line(&mut self, raw: &str) {
        self.output.stats.total_lines += 1;
        let line = strip_ansi(raw);

        if let Some(caps) = RECORD_REGEX.captures(&line) {
            self.flush();

            let timestamp = parse_iso8601(&caps["ts"]);
            if !self.range.admits(timestamp) {
                self.output.stats.filtered_out += 1;
                return;
            }

            let record = PendingRecord {
                timestamp,
                pod: caps["pod"].to_string(),
                message: caps["msg"].trim_end().to_string(),
                stack: Vec::new(),
                dropped_frames: 0,
            };

            if STACK_START_REGEX.is_match(&record.message) {
                self.pending = Some(record);
            } else {
                self.emit(record);
            }
            return;
        }

        if let Some(pending) = self.pending.as_mut() {
            if CONTINUATION_REGEX.is_match(&line) {
                if pending.stack.len() < MAX_STACK_LINES {
                    pending
                        .stack
                        .push(truncate_chars(line.trim_end(), MAX_FRAME_CHARS));
                } else {
                    pending.dropped_frames += 1;
                }
            }
        }
    }

    /// Flushes any pending record and returns the file's output.
    #[must_use]
    pub fn finish(mut self) -> ParsedErrorLog {
        self.flush();
        self.output
    }

    fn flush(&mut self) {
        if let Some(record) = self.pending.take() {
            self.emit(record);
        }
    }

    fn emit(&mut self, record: PendingRecord) {
        let PendingRecord {
            timestamp,
            pod,
            message,
            mut stack,
            dropped_frames,
        } = record;

        if dropped_frames > 0 {
            stack.push(format!("    ... {dropped_frames} more frames"));
        }
        let stack_trace = (!stack.is_empty()).then(|| stack.join("\n"));

        let mut classify_input = truncate_chars(&message, MAX_CLASSIFY_CHARS);
        if let Some(trace) = &stack_trace {
            classify_input.push('\n');
            classify_input.push_str(trace);
        }
        let classification = classify(&classify_input);

        let event = LogEvent {
            timestamp,
            deployment: deployment_from_pod(&pod),
            pod,
            level: Level::detect(&message),
            bot_id: extract_bot_id(&message),
            message: truncate_chars(&message, MAX_MESSAGE_CHARS),
            categories: classification.categories,
            severity: classification.severity,
            stack_trace,
        };

        self.output.stats.record(&event);
        self.output.events.push(event);
    }
}

/// Parser for `errors_<date>_<time>.log` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorStreamParser {
    range: TimeRange,
}

impl ErrorStreamParser {
    /// Creates a parser that keeps only records inside `range`.
    #[must_use]
    pub const fn new(range: TimeRange) -> Self {
        Self { range }
    }

    /// Streams a file from disk.
    pub async fn parse_file(&self, path: &Path) -> Result<ParsedErrorLog> {
        let mut reader = LineReader::open(path).await?;
        let mut state = ErrorStreamState::new(self.range);

        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| IngestError::io(path, e))?
        {
            state.process_line(&line);
        }

        let output = state.finish();
        debug!(
            path = %path.display(),
            lines = output.stats.total_lines,
            events = output.stats.event_count,
            filtered = output.stats.filtered_out,
            "parsed error log"
        );
        Ok(output)
    }

    /// Streams any async reader.
    pub async fn parse_reader<R: AsyncRead + Unpin>(
        &self,
        reader: R,
    ) -> std::io::Result<ParsedErrorLog> {
        let mut lines = LineReader::new(reader);
        let mut state = ErrorStreamState::new(self.range);
        while let Some(line) = lines.next_line().await? {
            state.process_line(&line);
        }
        Ok(state.finish())
    }

    /// Parses in-memory text.
    #[must_use]
    pub fn parse_str(&self, text: &str) -> ParsedErrorLog {
        let mut state = ErrorStreamState::new(self.range);
        for line in text.lines() {
            state.process_line(line);
        }
        state.finish()
    }
}
