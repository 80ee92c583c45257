//! Core record types produced by the parsers.
//!
//! This module provides:
//! - [`Level`]: Keyword-derived severity level of a log record
//! - [`LogEvent`]: A classified, immutable log record
//! - [`FileStats`]: Per-file tallies collected while streaming
//! - [`TimeRange`]: Inclusive time filter

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

// Substring matches so exception class names (`TypeError`) count too.
static ERROR_KEYWORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:error|fatal|critical)").unwrap_or_else(|_| unreachable!()));

static WARNING_KEYWORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)warn(?:ing)?\b").unwrap_or_else(|_| unreachable!()));

static DEBUG_KEYWORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdebug\b").unwrap_or_else(|_| unreachable!()));

/// Log level derived from keywords in the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// `error`, `fatal` or `critical` appears in the message.
    Error,
    /// `warn` or `warning` appears in the message.
    Warning,
    /// `debug` appears in the message.
    Debug,
    /// Anything else.
    Info,
}

impl Level {
    /// Derives the level by keyword search, independent of classification.
    #[must_use]
    pub fn detect(message: &str) -> Self {
        if ERROR_KEYWORDS.is_match(message) {
            Self::Error
        } else if WARNING_KEYWORDS.is_match(message) {
            Self::Warning
        } else if DEBUG_KEYWORDS.is_match(message) {
            Self::Debug
        } else {
            Self::Info
        }
    }

    /// Returns the string representation of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Debug => "debug",
            Self::Info => "info",
        }
    }

    /// Returns true for error and warning levels.
    #[must_use]
    pub const fn is_problem(&self) -> bool {
        matches!(self, Self::Error | Self::Warning)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified log record.
///
/// `categories` is never empty; records matching no pattern carry
/// `uncategorized`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// When the record was written, if its timestamp parsed.
    pub timestamp: Option<DateTime<Utc>>,
    /// Pod that emitted the record.
    pub pod: String,
    /// Workload name derived from the pod name.
    pub deployment: String,
    /// Keyword-derived level.
    pub level: Level,
    /// Message text, truncated to a bounded length.
    pub message: String,
    /// Matched taxonomy categories, in table order.
    pub categories: Vec<&'static str>,
    /// Highest severity weight among `categories`.
    pub severity: u8,
    /// Bot or tenant identifier mentioned in the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    /// Continuation lines of a stack trace that followed the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl LogEvent {
    /// Returns true if this event carries the given category.
    #[must_use]
    pub fn has_category(&self, name: &str) -> bool {
        self.categories.iter().any(|c| *c == name)
    }
}

/// Tallies gathered while streaming one error-log file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    /// Every line read, including continuation and discarded lines.
    pub total_lines: u64,
    /// Emitted events at error level.
    pub error_count: u64,
    /// Emitted events at warning level.
    pub warning_count: u64,
    /// Emitted events.
    pub event_count: u64,
    /// Record lines skipped by the time filter.
    pub filtered_out: u64,
    /// Events per pod.
    pub per_pod: BTreeMap<String, u64>,
    /// Events per derived deployment.
    pub per_deployment: BTreeMap<String, u64>,
    /// Events per category.
    pub per_category: BTreeMap<&'static str, u64>,
    /// Earliest event timestamp.
    pub first_timestamp: Option<DateTime<Utc>>,
    /// Latest event timestamp.
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl FileStats {
    /// Accounts for an emitted event.
    pub fn record(&mut self, event: &LogEvent) {
        self.event_count += 1;
        match event.level {
            Level::Error => self.error_count += 1,
            Level::Warning => self.warning_count += 1,
            Level::Debug | Level::Info => {}
        }
        *self.per_pod.entry(event.pod.clone()).or_insert(0) += 1;
        *self
            .per_deployment
            .entry(event.deployment.clone())
            .or_insert(0) += 1;
        for category in &event.categories {
            *self.per_category.entry(category).or_insert(0) += 1;
        }
        if let Some(ts) = event.timestamp {
            self.observe_timestamp(ts);
        }
    }

    /// Widens the first/last window to include `ts`.
    pub fn observe_timestamp(&mut self, ts: DateTime<Utc>) {
        if self.first_timestamp.is_none_or(|first| ts < first) {
            self.first_timestamp = Some(ts);
        }
        if self.last_timestamp.is_none_or(|last| ts > last) {
            self.last_timestamp = Some(ts);
        }
    }
}

/// Inclusive time filter; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub start: Option<DateTime<Utc>>,
    /// End of the range (inclusive).
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Creates a time range, rejecting a start that lies after the end.
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(IngestError::InvalidTimeRange);
            }
        }
        Ok(Self { start, end })
    }

    /// A range with no bounds.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Returns true if neither bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Checks if a timestamp falls within this range.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if timestamp > end {
                return false;
            }
        }
        true
    }

    /// Like [`TimeRange::contains`], but a missing timestamp is always kept.
    #[must_use]
    pub fn admits(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        timestamp.is_none_or(|ts| self.contains(ts))
    }
}
