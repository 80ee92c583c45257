//! Pattern-based classification of log messages.
//!
//! The taxonomy is a flat, ordered table of `(name, pattern, severity)`
//! triples. Every pattern is tested against every message, so a message can
//! carry several tags (`timeout_generic` and `http_5xx`, say). Table order
//! only controls presentation. Severity weights live here and nowhere else.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::Serialize;

/// Fallback category for messages that match no pattern.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Severity weight of [`UNCATEGORIZED`].
pub const UNCATEGORIZED_SEVERITY: u8 = 1;

/// The error taxonomy: category name, pattern, severity weight (1–5).
pub const TAXONOMY: &[(&str, &str, u8)] = &[
    (
        "redis_connection",
        r"(?i)redis[^\n]*(?:ECONNREFUSED|ECONNRESET|ETIMEDOUT|connection (?:refused|lost|closed|reset|error|timed? ?out)|could not connect|socket closed unexpectedly)|ECONNREFUSED[^\n]*:6379|:6379[^\n]*(?:ECONNREFUSED|refused|timed? ?out)|error connecting to redis",
        5,
    ),
    (
        "redis_error",
        r"(?i)\b(?:redis|ioredis)\b[^\n]*\b(?:error|exception|failed)\b|\b(?:WRONGTYPE|NOAUTH|MISCONF|CROSSSLOT)\b|READONLY You can't write|OOM command not allowed",
        4,
    ),
    (
        "rasa_timeout",
        r"(?i)\brasa[^\n]*(?:timed? ?out|timeout|ReadTimeout)|action server[^\n]*(?:timed? ?out|timeout)|(?:rasa|nlu)[^\n]*took too long",
        5,
    ),
    (
        "mysql_warning",
        r"(?i)\b(?:mysql|mariadb|pymysql)[^\n]*\bwarning\b|\bWarning: \(\d{4}|aborted connection \d+",
        3,
    ),
    (
        "mysql_error",
        r"(?i)\b(?:mysql|mariadb|pymysql)[^\n]*\b(?:error|exception)\b|\bOperationalError\b|\bER_[A-Z_]{3,}\b|lost connection to mysql|too many connections|\((?:1040|1045|1205|1213|2002|2003|2006|2013), ",
        5,
    ),
    (
        "nlu_fallback",
        r"(?i)nlu_fallback|fallback (?:intent|action|policy|triggered)|low (?:nlu )?confidence|action_default_fallback",
        3,
    ),
    (
        "tensorflow_warning",
        r"(?i)tensorflow[^\n]*(?:warn|deprecat)|\b[WI] tensorflow/|oneDNN custom operations|could not load dynamic library|cuda_driver",
        2,
    ),
    (
        "oom_killed",
        r"(?i)OOMKilled|\bout of memory\b|oom[- _]?kill|cannot allocate memory|heap out of memory|\bMemoryError\b|exit code 137",
        5,
    ),
    (
        "http_5xx",
        r#"(?i)\b(?:status(?:[ _]?code)?|HTTP/\d(?:\.\d)?"?|response code)[=:\s"]+5\d{2}\b|"\s5\d{2}\s|\b5\d{2}\s+(?:Internal Server Error|Bad Gateway|Service Unavailable|Gateway Time-?out)|\b(?:Internal Server Error|Bad Gateway|Service Unavailable)\b"#,
        4,
    ),
    (
        "http_4xx",
        r#"(?i)\b(?:status(?:[ _]?code)?|HTTP/\d(?:\.\d)?"?|response code)[=:\s"]+4\d{2}\b|"\s4\d{2}\s|\b4\d{2}\s+(?:Bad Request|Unauthorized|Forbidden|Not Found|Too Many Requests)"#,
        2,
    ),
    (
        "connection_reset",
        r"(?i)ECONNRESET|connection reset|socket hang up|broken pipe|\bEPIPE\b|connection aborted|ECONNABORTED",
        4,
    ),
    (
        "dns_error",
        r"(?i)ENOTFOUND|EAI_AGAIN|getaddrinfo|name or service not known|temporary failure in name resolution|no such host|could not resolve host|dns (?:lookup|resolution)[^\n]*fail",
        4,
    ),
    (
        "timeout_generic",
        r"(?i)\btimed?\s?out\b|\btimeout\b|ETIMEDOUT|ESOCKETTIMEDOUT|deadline exceeded",
        4,
    ),
    (
        "crash_restart",
        r"(?i)CrashLoopBackOff|back-off restarting|container (?:restarted|died|exited)|exited with (?:code|status) [1-9]|restarting (?:container|pod|worker)|worker (?:died|exited)|WORKER TIMEOUT|\bSIGKILL\b|\bSIGSEGV\b|segmentation fault",
        5,
    ),
    (
        "memory_pressure",
        r"(?i)MemoryPressure|memory pressure|evict(?:ed|ing)[^\n]*memory|low on (?:resource: )?memory|GC overhead limit|memory usage[^\n]*(?:exceed|above|critical)",
        5,
    ),
    (
        "disk_pressure",
        r"(?i)DiskPressure|disk pressure|no space left on device|\bENOSPC\b|disk (?:full|quota exceeded)|low on (?:resource: )?ephemeral-storage",
        5,
    ),
    (
        "auth_error",
        r"(?i)unauthori[sz]ed|authentication (?:failed|error)|auth(?:orization)? (?:failed|error)|invalid (?:token|credentials|api[ _-]?key|signature)|access denied|permission denied|jwt (?:expired|malformed)|\b(?:401|403)\b",
        3,
    ),
    (
        "rate_limit",
        r"(?i)rate[- _]?limit|too many requests|\b429\b|throttl(?:ed|ing)|quota exceeded",
        3,
    ),
    (
        "slow_query",
        r"(?i)slow query|query took \d+|long[- ]running query|slow_query|execution time exceeded|query exceeded",
        3,
    ),
    (
        "lock_failure",
        r"(?i)deadlock|lock wait timeout|could not (?:obtain|acquire) lock|failed to acquire lock|lock (?:acquisition|timeout)|redlock|lock already held",
        4,
    ),
    (
        "kafka_error",
        r"(?i)kafka[^\n]*\b(?:error|exception|fail(?:ed|ure)?|unavailable|timed? ?out)\b|KafkaJS\w*Error|LEADER_NOT_AVAILABLE|NOT_LEADER_FOR_PARTITION|OFFSET_OUT_OF_RANGE|broker[^\n]*(?:not available|disconnected)",
        4,
    ),
    (
        "unhandled_exception",
        r"(?i)unhandled (?:exception|rejection|promise rejection|error)|uncaught (?:exception|error|typeerror)|UnhandledPromiseRejection|panicked at|fatal error:",
        5,
    ),
    (
        "stack_trace",
        r#"(?im)traceback \(most recent call last\)|^\s+at\s+\S|exception in thread|^\s+File "[^"]+", line \d+"#,
        3,
    ),
];

static TAXONOMY_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(TAXONOMY.iter().map(|(_, pattern, _)| *pattern))
        .unwrap_or_else(|_| unreachable!())
});

static BOT_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\bbot[_-]?id["']?\s*[:=]\s*["']?([A-Za-z0-9_.-]+)|"bot"\s*:\s*"([^"]+)"|/bots?/([A-Za-z0-9_.-]+)"#,
    )
    .unwrap_or_else(|_| unreachable!())
});

/// Result of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Matched category names in table order; never empty.
    pub categories: Vec<&'static str>,
    /// Highest severity weight among the matched categories.
    pub severity: u8,
}

/// Classifies a message (ANSI codes already stripped).
///
/// Pure and deterministic: the same text always yields the same result.
#[must_use]
pub fn classify(text: &str) -> Classification {
    let mut categories = Vec::new();
    let mut severity = 0;

    for idx in TAXONOMY_SET.matches(text).iter() {
        let (name, _, weight) = TAXONOMY[idx];
        categories.push(name);
        severity = severity.max(weight);
    }

    if categories.is_empty() {
        return Classification {
            categories: vec![UNCATEGORIZED],
            severity: UNCATEGORIZED_SEVERITY,
        };
    }

    Classification {
        categories,
        severity,
    }
}

/// Returns the fixed severity weight of a category.
///
/// Unknown names weigh the same as [`UNCATEGORIZED`].
#[must_use]
pub fn severity_of(name: &str) -> u8 {
    TAXONOMY
        .iter()
        .find(|(n, _, _)| *n == name)
        .map_or(UNCATEGORIZED_SEVERITY, |(_, _, weight)| *weight)
}

/// Position of a category in presentation order; the fallback sorts last.
#[must_use]
pub fn category_rank(name: &str) -> usize {
    TAXONOMY
        .iter()
        .position(|(n, _, _)| *n == name)
        .unwrap_or(TAXONOMY.len())
}

/// Every category name with its weight, fallback included, in table order.
pub fn categories() -> impl Iterator<Item = (&'static str, u8)> {
    TAXONOMY
        .iter()
        .map(|(name, _, weight)| (*name, *weight))
        .chain(std::iter::once((UNCATEGORIZED, UNCATEGORIZED_SEVERITY)))
}

/// Extracts a bot/tenant identifier from `bot_id=…`, `"bot": "…"` or `/bots/<id>/`.
#[must_use]
pub fn extract_bot_id(text: &str) -> Option<String> {
    let caps = BOT_ID_REGEX.captures(text)?;
    (1..=3)
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().to_string())
}
