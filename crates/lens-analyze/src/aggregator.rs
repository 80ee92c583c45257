//! Rollups over classified error-log events.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lens_ingest::{BUCKET_SECONDS, Level, LogEvent, bucket_start, category_rank, severity_of};
use serde::Serialize;

/// Representative events kept per category.
pub const MAX_SAMPLES: usize = 5;

/// Entries in the top-pods and top-bots lists.
pub const TOP_N: usize = 10;

/// Running tally for one taxonomy category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCategory {
    /// Category name.
    pub name: &'static str,
    /// Fixed severity weight.
    pub severity: u8,
    /// Events carrying the category.
    pub count: u64,
    /// Pods that emitted it.
    pub pods: BTreeSet<String>,
    /// Deployments that emitted it.
    pub deployments: BTreeSet<String>,
    /// Bot ids mentioned alongside it.
    pub bot_ids: BTreeSet<String>,
    /// The first few events seen.
    pub samples: Vec<LogEvent>,
}

impl ErrorCategory {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            severity: severity_of(name),
            count: 0,
            pods: BTreeSet::new(),
            deployments: BTreeSet::new(),
            bot_ids: BTreeSet::new(),
            samples: Vec::new(),
        }
    }

    fn add(&mut self, event: &LogEvent) {
        self.count += 1;
        self.pods.insert(event.pod.clone());
        self.deployments.insert(event.deployment.clone());
        if let Some(bot) = &event.bot_id {
            self.bot_ids.insert(bot.clone());
        }
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(event.clone());
        }
    }
}

/// Per-pod event counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodTally {
    /// Pod name.
    pub pod: String,
    /// Derived deployment.
    pub deployment: String,
    /// All events.
    pub events: u64,
    /// Error-level events.
    pub errors: u64,
    /// Warning-level events.
    pub warnings: u64,
}

/// Per-bot event counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotTally {
    /// Bot identifier.
    pub bot_id: String,
    /// Events mentioning it.
    pub events: u64,
}

/// One five-minute slot of the error timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineBucket {
    /// Bucket start.
    pub start: DateTime<Utc>,
    /// Events in the bucket.
    pub total: u64,
    /// Error-level events.
    pub errors: u64,
    /// Warning-level events.
    pub warnings: u64,
    /// Events per category.
    pub categories: BTreeMap<&'static str, u64>,
}

/// Finished rollups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorAnalysis {
    /// Events aggregated.
    pub total_events: u64,
    /// Events without a timestamp.
    pub undated_events: u64,
    /// Categories by count descending, ties in taxonomy order.
    pub categories: Vec<ErrorCategory>,
    /// Five-minute buckets in chronological order.
    pub timeline: Vec<TimelineBucket>,
    /// Pods with the most errors.
    pub top_pods: Vec<PodTally>,
    /// Bots with the most events.
    pub top_bots: Vec<BotTally>,
}

impl ErrorAnalysis {
    /// Event count for a category, zero when it never appeared.
    #[must_use]
    pub fn count(&self, category: &str) -> u64 {
        self.category(category).map_or(0, |c| c.count)
    }

    /// Looks up a category rollup.
    #[must_use]
    pub fn category(&self, name: &str) -> Option<&ErrorCategory> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Incremental aggregator fed one event at a time.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    total_events: u64,
    undated_events: u64,
    categories: BTreeMap<&'static str, ErrorCategory>,
    pods: BTreeMap<String, PodTally>,
    bots: BTreeMap<String, u64>,
    timeline: BTreeMap<DateTime<Utc>, TimelineBucket>,
}

impl ErrorAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one event.
    pub fn add(&mut self, event: &LogEvent) {
        self.total_events += 1;

        for &name in &event.categories {
            self.categories
                .entry(name)
                .or_insert_with(|| ErrorCategory::new(name))
                .add(event);
        }

        let tally = self
            .pods
            .entry(event.pod.clone())
            .or_insert_with(|| PodTally {
                pod: event.pod.clone(),
                deployment: event.deployment.clone(),
                events: 0,
                errors: 0,
                warnings: 0,
            });
        tally.events += 1;
        match event.level {
            Level::Error => tally.errors += 1,
            Level::Warning => tally.warnings += 1,
            Level::Debug | Level::Info => {}
        }

        if let Some(bot) = &event.bot_id {
            *self.bots.entry(bot.clone()).or_insert(0) += 1;
        }

        let Some(ts) = event.timestamp else {
            self.undated_events += 1;
            return;
        };
        let start = bucket_start(ts, BUCKET_SECONDS);
        let bucket = self.timeline.entry(start).or_insert_with(|| TimelineBucket {
            start,
            total: 0,
            errors: 0,
            warnings: 0,
            categories: BTreeMap::new(),
        });
        bucket.total += 1;
        match event.level {
            Level::Error => bucket.errors += 1,
            Level::Warning => bucket.warnings += 1,
            Level::Debug | Level::Info => {}
        }
        for &name in &event.categories {
            *bucket.categories.entry(name).or_insert(0) += 1;
        }
    }

    /// Adds every event in a slice.
    pub fn extend<'a>(&mut self, events: impl IntoIterator<Item = &'a LogEvent>) {
        for event in events {
            self.add(event);
        }
    }

    /// Produces the sorted rollups.
    #[must_use]
    pub fn finish(self) -> ErrorAnalysis {
        let mut categories: Vec<ErrorCategory> = self.categories.into_values().collect();
        categories.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| category_rank(a.name).cmp(&category_rank(b.name)))
        });

        let mut top_pods: Vec<PodTally> = self.pods.into_values().collect();
        top_pods.sort_by(|a, b| {
            b.errors
                .cmp(&a.errors)
                .then_with(|| b.events.cmp(&a.events))
                .then_with(|| a.pod.cmp(&b.pod))
        });
        top_pods.truncate(TOP_N);

        let mut top_bots: Vec<BotTally> = self
            .bots
            .into_iter()
            .map(|(bot_id, events)| BotTally { bot_id, events })
            .collect();
        top_bots.sort_by(|a, b| b.events.cmp(&a.events).then_with(|| a.bot_id.cmp(&b.bot_id)));
        top_bots.truncate(TOP_N);

        ErrorAnalysis {
            total_events: self.total_events,
            undated_events: self.undated_events,
            categories,
            timeline: self.timeline.into_values().collect(),
            top_pods,
            top_bots,
        }
    }
}
