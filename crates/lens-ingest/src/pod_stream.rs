//! Bucketed summaries of raw pod logs.
//!
//! Raw `kubectl logs --timestamps` output can run to millions of lines per
//! pod, so nothing is retained per line. Each file is reduced to five-minute
//! buckets, level counts, category tallies and a bounded table of message
//! signatures.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::classifier::classify;
use crate::error::{IngestError, Result};
use crate::types::{Level, TimeRange};
use crate::util::{
    BUCKET_SECONDS, LineReader, deployment_from_pod, parse_iso8601, strip_ansi, truncate_chars,
};

/// Number of signatures reported per pod.
pub const TOP_SIGNATURES: usize = 20;

/// Distinct signatures tracked per pod before new ones spill into `other`.
pub const MAX_SIGNATURES: usize = 1000;

const MAX_SIGNATURE_CHARS: usize = 200;

static LEADING_TS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+(?P<msg>.*)$",
    )
    .unwrap_or_else(|_| unreachable!())
});

static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .unwrap_or_else(|_| unreachable!())
});

static HEX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b0x[0-9a-f]+\b|\b[0-9a-f]*\d[0-9a-f]*[a-f][0-9a-f]*\b")
        .unwrap_or_else(|_| unreachable!())
});

static NUMBER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").unwrap_or_else(|_| unreachable!()));

/// Line counts for one five-minute window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogBucket {
    /// Start of the window.
    pub start: DateTime<Utc>,
    /// Lines in the window.
    pub total: u64,
    /// Error-level lines.
    pub errors: u64,
    /// Warning-level lines.
    pub warnings: u64,
}

/// Lines per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    /// Error-level lines.
    pub error: u64,
    /// Warning-level lines.
    pub warning: u64,
    /// Debug-level lines.
    pub debug: u64,
    /// Everything else.
    pub info: u64,
}

impl LevelCounts {
    fn add(&mut self, level: Level) {
        match level {
            Level::Error => self.error += 1,
            Level::Warning => self.warning += 1,
            Level::Debug => self.debug += 1,
            Level::Info => self.info += 1,
        }
    }
}

/// A normalized message shape and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSignature {
    /// Message with numbers, hex strings and UUIDs replaced by placeholders.
    pub signature: String,
    /// Occurrences.
    pub count: u64,
    /// Level of the first occurrence.
    pub level: Level,
    /// First timestamped occurrence.
    pub first_seen: Option<DateTime<Utc>>,
    /// Last timestamped occurrence.
    pub last_seen: Option<DateTime<Utc>>,
}

/// Summary of one raw pod log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodStreamSummary {
    /// Pod name taken from the file name.
    pub pod: String,
    /// Workload derived from the pod name.
    pub deployment: String,
    /// Every line read.
    pub total_lines: u64,
    /// Lines that carried a parseable timestamp.
    pub timed_lines: u64,
    /// Lines skipped by the time filter.
    pub filtered_out: u64,
    /// Lines per level.
    pub levels: LevelCounts,
    /// Five-minute buckets in chronological order.
    pub buckets: Vec<LogBucket>,
    /// Category tallies over error and warning lines.
    pub categories: BTreeMap<&'static str, u64>,
    /// Most frequent error/warning signatures.
    pub top_messages: Vec<MessageSignature>,
    /// Error/warning lines whose signature did not fit in the table.
    pub other_signatures: u64,
    /// Earliest timestamp seen.
    pub first_timestamp: Option<DateTime<Utc>>,
    /// Latest timestamp seen.
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Normalizes a message into a signature for grouping.
#[must_use]
pub fn message_signature(message: &str) -> String {
    let text = UUID_REGEX.replace_all(message, "<uuid>");
    let text = HEX_REGEX.replace_all(&text, "<hex>");
    let text = NUMBER_REGEX.replace_all(&text, "<n>");
    truncate_chars(text.trim(), MAX_SIGNATURE_CHARS)
}

/// Per-file summarization state.
#[derive(Debug)]
pub struct PodStreamState {
    pod: String,
    range: TimeRange,
    total_lines: u64,
    timed_lines: u64,
    filtered_out: u64,
    levels: LevelCounts,
    buckets: BTreeMap<i64, LogBucket>,
    categories: BTreeMap<&'static str, u64>,
    signatures: HashMap<String, MessageSignature>,
    other_signatures: u64,
    first_timestamp: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl PodStreamState {
    /// Creates state for the given pod.
    #[must_use]
    pub fn new(pod: impl Into<String>, range: TimeRange) -> Self {
        Self {
            pod: pod.into(),
            range,
            total_lines: 0,
            timed_lines: 0,
            filtered_out: 0,
            levels: LevelCounts::default(),
            buckets: BTreeMap::new(),
            categories: BTreeMap::new(),
            signatures: HashMap::new(),
            other_signatures: 0,
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    /// Feeds one raw line.
    pub fn process_line(&mut self, raw: &str) {
        self.total_lines += 1;
        let line = strip_ansi(raw);
        if line.trim().is_empty() {
            return;
        }

        let (timestamp, message) = match LEADING_TS_REGEX.captures(&line) {
            Some(caps) => (
                parse_iso8601(&caps["ts"]),
                caps.name("msg").map_or("", |m| m.as_str()).to_string(),
            ),
            None => (None, line.to_string()),
        };

        if !self.range.admits(timestamp) {
            self.filtered_out += 1;
            return;
        }

        let level = Level::detect(&message);
        self.levels.add(level);

        if let Some(ts) = timestamp {
            self.timed_lines += 1;
            if self.first_timestamp.is_none_or(|first| ts < first) {
                self.first_timestamp = Some(ts);
            }
            if self.last_timestamp.is_none_or(|last| ts > last) {
                self.last_timestamp = Some(ts);
            }

            let key = ts.timestamp() - ts.timestamp().rem_euclid(BUCKET_SECONDS);
            let bucket = self.buckets.entry(key).or_insert_with(|| LogBucket {
                start: Utc.timestamp_opt(key, 0).single().unwrap_or(ts),
                total: 0,
                errors: 0,
                warnings: 0,
            });
            bucket.total += 1;
            match level {
                Level::Error => bucket.errors += 1,
                Level::Warning => bucket.warnings += 1,
                Level::Debug | Level::Info => {}
            }
        }

        if level.is_problem() {
            for category in classify(&message).categories {
                *self.categories.entry(category).or_insert(0) += 1;
            }
            self.tally_signature(&message, level, timestamp);
        }
    }

    fn tally_signature(&mut self, message: &str, level: Level, timestamp: Option<DateTime<Utc>>) {
        let signature = message_signature(message);
        if let Some(entry) = self.signatures.get_mut(&signature) {
            entry.count += 1;
            if let Some(ts) = timestamp {
                entry.first_seen = Some(entry.first_seen.map_or(ts, |f| f.min(ts)));
                entry.last_seen = Some(entry.last_seen.map_or(ts, |l| l.max(ts)));
            }
            return;
        }

        if self.signatures.len() >= MAX_SIGNATURES {
            self.other_signatures += 1;
            return;
        }

        self.signatures.insert(
            signature.clone(),
            MessageSignature {
                signature,
                count: 1,
                level,
                first_seen: timestamp,
                last_seen: timestamp,
            },
        );
    }

    /// Produces the summary.
    #[must_use]
    pub fn finish(self) -> PodStreamSummary {
        let mut top: Vec<MessageSignature> = self.signatures.into_values().collect();
        top.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        top.truncate(TOP_SIGNATURES);

        PodStreamSummary {
            deployment: deployment_from_pod(&self.pod),
            pod: self.pod,
            total_lines: self.total_lines,
            timed_lines: self.timed_lines,
            filtered_out: self.filtered_out,
            levels: self.levels,
            buckets: self.buckets.into_values().collect(),
            categories: self.categories,
            top_messages: top,
            other_signatures: self.other_signatures,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_timestamp,
        }
    }
}

/// Parser for raw per-pod logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodStreamParser {
    range: TimeRange,
}

impl PodStreamParser {
    /// Creates a parser that keeps only lines inside `range`.
    #[must_use]
    pub const fn new(range: TimeRange) -> Self {
        Self { range }
    }

    /// Summarizes a file; the pod name is the file stem.
    pub async fn parse_file(&self, path: &Path) -> Result<PodStreamSummary> {
        let pod = path
            .file_stem()
            .map_or_else(|| "unknown".to_string(), |s| s.to_string_lossy().into_owned());
        let mut reader = LineReader::open(path).await?;
        let mut state = PodStreamState::new(pod, self.range);

        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| IngestError::io(path, e))?
        {
            state.process_line(&line);
        }

        let summary = state.finish();
        debug!(
            path = %path.display(),
            pod = %summary.pod,
            lines = summary.total_lines,
            buckets = summary.buckets.len(),
            "summarized pod log"
        );
        Ok(summary)
    }

    /// Summarizes any async reader.
    pub async fn parse_reader<R: AsyncRead + Unpin>(
        &self,
        pod: &str,
        reader: R,
    ) -> std::io::Result<PodStreamSummary> {
        let mut lines = LineReader::new(reader);
        let mut state = PodStreamState::new(pod, self.range);
        while let Some(line) = lines.next_line().await? {
            state.process_line(&line);
        }
        Ok(state.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POD_LOG: &str = "\
2024-01-15T10:00:01.123456789Z INFO starting server on port 8080
2024-01-15T10:01:00Z ERROR request 1234 failed: connect ECONNREFUSED 10.0.0.5:6379
2024-01-15T10:02:00Z ERROR request 5678 failed: connect ECONNREFUSED 10.0.0.5:6379
2024-01-15T10:06:00Z WARNING slow response 900ms

untimestamped error line
";

    async fn summarize(text: &str) -> PodStreamSummary {
        PodStreamParser::default()
            .parse_reader("api-7d9f8c6b5-x2x4q", text.as_bytes())
            .await
            .unwrap()
    }

    #[test]
    fn signatures_mask_variable_parts() {
        assert_eq!(
            message_signature("request 1234 failed after 30s"),
            "request <n> failed after <n>s"
        );
        assert_eq!(
            message_signature("session 123e4567-e89b-12d3-a456-426614174000 expired"),
            "session <uuid> expired"
        );
        assert_eq!(message_signature("ptr 0x7ffee4b2 freed"), "ptr <hex> freed");
    }

    #[tokio::test]
    async fn buckets_and_levels() {
        let summary = summarize(POD_LOG).await;

        assert_eq!(summary.pod, "api-7d9f8c6b5-x2x4q");
        assert_eq!(summary.deployment, "api");
        assert_eq!(summary.total_lines, 6);
        assert_eq!(summary.timed_lines, 4);
        assert_eq!(summary.levels.error, 3);
        assert_eq!(summary.levels.warning, 1);
        assert_eq!(summary.levels.info, 1);

        assert_eq!(summary.buckets.len(), 2);
        assert_eq!(summary.buckets[0].total, 3);
        assert_eq!(summary.buckets[0].errors, 2);
        assert_eq!(summary.buckets[1].warnings, 1);
        assert!(summary.buckets[0].start < summary.buckets[1].start);
    }

    #[tokio::test]
    async fn repeated_errors_share_a_signature() {
        let summary = summarize(POD_LOG).await;

        let top = &summary.top_messages[0];
        assert_eq!(top.count, 2);
        assert!(top.signature.contains("ECONNREFUSED"));
        assert!(top.first_seen < top.last_seen);
        assert_eq!(summary.categories["redis_connection"], 2);
    }

    #[tokio::test]
    async fn time_filter_applies() {
        let start = parse_iso8601("2024-01-15T10:05:00Z");
        let range = TimeRange::new(start, None).unwrap();
        let summary = PodStreamParser::new(range)
            .parse_reader("p", POD_LOG.as_bytes())
            .await
            .unwrap();
        assert_eq!(summary.filtered_out, 3);
        assert_eq!(summary.buckets.len(), 1);
    }

    #[test]
    fn signature_table_is_bounded() {
        let mut state = PodStreamState::new("p", TimeRange::unbounded());
        for i in 0..(MAX_SIGNATURES + 5) {
            state.process_line(&format!("ERROR variant-{} failed", "x".repeat(i % 50 + 1) + &"y".repeat(i / 50)));
        }
        let summary = state.finish();
        assert_eq!(summary.top_messages.len(), TOP_SIGNATURES);
        assert_eq!(summary.other_signatures, 5);
    }

    #[tokio::test]
    async fn parse_file_uses_file_stem_as_pod() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rasa-0.log");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(POD_LOG.as_bytes()).unwrap();

        let summary = PodStreamParser::default().parse_file(&path).await.unwrap();
        assert_eq!(summary.pod, "rasa-0");
        assert_eq!(summary.deployment, "rasa");
    }
}
