//! Global event cap with per-file coverage.
//!
//! When the combined event count of an archive exceeds the cap, every file
//! first receives a guaranteed minimum, the rest of the budget is shared in
//! proportion to what each file has left, and each file is thinned with a
//! uniform stride that keeps its first and last event.

use serde::Serialize;
use tracing::debug;

use crate::types::LogEvent;

/// Default cap on retained events.
pub const MAX_EVENTS: usize = 200_000;

/// Upper bound of the per-file guaranteed minimum.
pub const MIN_EVENTS_PER_FILE: usize = 5_000;

/// Result of applying the budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BudgetOutcome {
    /// Retained events sorted by timestamp; undated events last.
    pub events: Vec<LogEvent>,
    /// Events removed by sampling.
    pub dropped: usize,
}

/// Event cap applied across all error-log files of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBudget {
    cap: usize,
    per_file_floor: usize,
}

impl Default for EventBudget {
    fn default() -> Self {
        Self::new(MAX_EVENTS)
    }
}

impl EventBudget {
    /// Creates a budget with the given cap.
    #[must_use]
    pub const fn new(cap: usize) -> Self {
        Self {
            cap,
            per_file_floor: MIN_EVENTS_PER_FILE,
        }
    }

    /// Overrides the per-file minimum bound.
    #[must_use]
    pub const fn with_floor(mut self, floor: usize) -> Self {
        self.per_file_floor = floor;
        self
    }

    /// Returns the cap.
    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Guaranteed minimum for a file of `count` events among `file_count` files.
    #[must_use]
    pub fn minimum_for(&self, count: usize, file_count: usize) -> usize {
        if file_count == 0 {
            return 0;
        }
        count.min(self.per_file_floor.min(self.cap / file_count))
    }

    /// Computes how many events each file may keep.
    #[must_use]
    pub fn allocate(&self, counts: &[usize]) -> Vec<usize> {
        let total: usize = counts.iter().sum();
        if total <= self.cap {
            return counts.to_vec();
        }

        let minimums: Vec<usize> = counts
            .iter()
            .map(|&c| self.minimum_for(c, counts.len()))
            .collect();
        let reserved: usize = minimums.iter().sum();
        let remaining = self.cap.saturating_sub(reserved) as u128;
        let total_leftover: u128 = counts
            .iter()
            .zip(&minimums)
            .map(|(&c, &m)| (c - m) as u128)
            .sum();

        counts
            .iter()
            .zip(&minimums)
            .map(|(&count, &min)| {
                let leftover = count - min;
                if total_leftover == 0 {
                    return min;
                }
                let share = remaining * leftover as u128 / total_leftover;
                let extra = usize::try_from(share).unwrap_or(usize::MAX).min(leftover);
                min + extra
            })
            .collect()
    }

    /// Caps and merges per-file event lists.
    #[must_use]
    pub fn apply(&self, files: Vec<Vec<LogEvent>>) -> BudgetOutcome {
        let counts: Vec<usize> = files.iter().map(Vec::len).collect();
        let total: usize = counts.iter().sum();
        let allocations = self.allocate(&counts);

        let mut events = Vec::with_capacity(total.min(self.cap));
        for (file_events, allocation) in files.into_iter().zip(allocations) {
            events.extend(stride_sample(file_events, allocation));
        }
        sort_events(&mut events);

        let dropped = total - events.len();
        if dropped > 0 {
            debug!(total, retained = events.len(), dropped, "sampled events down to budget");
        }
        BudgetOutcome { events, dropped }
    }
}

/// Stable sort by timestamp with undated events last.
pub fn sort_events(events: &mut [LogEvent]) {
    events.sort_by_key(|e| (e.timestamp.is_none(), e.timestamp));
}

/// Indices kept when thinning `total` items down to `allocation`.
///
/// The first index is always kept; the last one too when `allocation >= 2`.
#[must_use]
pub fn stride_indices(total: usize, allocation: usize) -> Vec<usize> {
    if allocation >= total {
        return (0..total).collect();
    }
    match allocation {
        0 => Vec::new(),
        1 => vec![0],
        k => {
            let n = total as u128;
            let k128 = k as u128;
            let mut indices: Vec<usize> = (0..k - 1)
                .map(|i| usize::try_from(i as u128 * n / k128).unwrap_or(total - 1))
                .collect();
            indices.push(total - 1);
            indices
        }
    }
}

/// Keeps the items at [`stride_indices`] positions.
#[must_use]
pub fn stride_sample<T>(items: Vec<T>, allocation: usize) -> Vec<T> {
    if allocation >= items.len() {
        return items;
    }
    let keep = stride_indices(items.len(), allocation);
    let mut next = keep.iter().peekable();
    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            if next.peek() == Some(&&idx) {
                next.next();
                Some(item)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Level;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    fn event_at(secs: Option<i64>, pod: &str) -> LogEvent {
        LogEvent {
            timestamp: secs.and_then(|s| Utc.timestamp_opt(1_705_312_800 + s, 0).single()),
            pod: pod.to_string(),
            deployment: pod.to_string(),
            level: Level::Error,
            message: "boom".to_string(),
            categories: vec!["uncategorized"],
            severity: 1,
            bot_id: None,
            stack_trace: None,
        }
    }

    fn file(pod: &str, count: usize) -> Vec<LogEvent> {
        (0..count).map(|i| event_at(Some(i as i64), pod)).collect()
    }

    mod allocation_tests {
        use super::*;

        #[test]
        fn under_cap_keeps_everything() {
            let budget = EventBudget::new(100);
            assert_eq!(budget.allocate(&[10, 20, 30]), vec![10, 20, 30]);
        }

        #[test]
        fn five_files_over_cap() {
            let budget = EventBudget::new(200_000);
            let alloc = budget.allocate(&[50_000; 5]);
            assert_eq!(alloc, vec![40_000; 5]);
            assert_eq!(alloc.iter().sum::<usize>(), 200_000);
        }

        #[test]
        fn small_file_kept_whole() {
            let budget = EventBudget::new(1_000);
            let alloc = budget.allocate(&[50, 10_000]);
            assert_eq!(alloc[0], 50);
            assert!(alloc[1] <= 950);
            assert!(alloc.iter().sum::<usize>() <= 1_000);
        }

        #[test]
        fn floor_bounds_minimum() {
            let budget = EventBudget::new(100_000).with_floor(10);
            assert_eq!(budget.minimum_for(500, 2), 10);
            assert_eq!(budget.minimum_for(5, 2), 5);
            assert_eq!(budget.minimum_for(5, 0), 0);
        }
    }

    mod stride_tests {
        use super::*;

        #[test]
        fn keeps_first_and_last() {
            assert_eq!(stride_indices(10, 3), vec![0, 3, 9]);
            assert_eq!(stride_indices(10, 2), vec![0, 9]);
            assert_eq!(stride_indices(10, 1), vec![0]);
            assert!(stride_indices(10, 0).is_empty());
            assert_eq!(stride_indices(3, 5), vec![0, 1, 2]);
        }

        #[test]
        fn sample_picks_positions() {
            let items: Vec<u32> = (0..10).collect();
            assert_eq!(stride_sample(items, 4), vec![0, 2, 5, 9]);
        }
    }

    mod apply_tests {
        use super::*;

        #[test]
        fn drops_excess_and_sorts() {
            let files: Vec<Vec<LogEvent>> = (0..5).map(|i| file(&format!("pod-{i}"), 50_000)).collect();
            let outcome = EventBudget::new(200_000).apply(files);

            assert_eq!(outcome.dropped, 50_000);
            assert_eq!(outcome.events.len(), 200_000);
            assert!(
                outcome
                    .events
                    .windows(2)
                    .all(|w| w[0].timestamp <= w[1].timestamp)
            );
            for i in 0..5 {
                let pod = format!("pod-{i}");
                let kept = outcome.events.iter().filter(|e| e.pod == pod).count();
                assert!(kept >= 5_000);
            }
        }

        #[test]
        fn undated_events_sort_last_in_order() {
            let files = vec![vec![
                event_at(None, "a"),
                event_at(Some(20), "b"),
                event_at(None, "c"),
                event_at(Some(10), "d"),
            ]];
            let outcome = EventBudget::new(10).apply(files);
            let pods: Vec<&str> = outcome.events.iter().map(|e| e.pod.as_str()).collect();
            assert_eq!(pods, vec!["d", "b", "a", "c"]);
            assert_eq!(outcome.dropped, 0);
        }

        #[test]
        fn sampled_file_keeps_endpoints() {
            let outcome = EventBudget::new(10).with_floor(2).apply(vec![file("x", 100)]);
            let first: Option<DateTime<Utc>> = outcome.events.first().and_then(|e| e.timestamp);
            let last = outcome.events.last().and_then(|e| e.timestamp);
            assert_eq!(first, Utc.timestamp_opt(1_705_312_800, 0).single());
            assert_eq!(last, Utc.timestamp_opt(1_705_312_800 + 99, 0).single());
            assert_eq!(outcome.events.len(), 10);
        }
    }

    proptest! {
        #[test]
        fn allocation_respects_cap_and_minimums(
            counts in prop::collection::vec(0usize..5_000, 1..8),
            cap in 1usize..10_000,
            floor in 1usize..2_000,
        ) {
            let budget = EventBudget::new(cap).with_floor(floor);
            let alloc = budget.allocate(&counts);

            prop_assert!(alloc.iter().sum::<usize>() <= cap);
            for (&c, &a) in counts.iter().zip(&alloc) {
                prop_assert!(a <= c);
                prop_assert!(a >= budget.minimum_for(c, counts.len()));
            }
        }

        #[test]
        fn stride_indices_are_increasing(total in 1usize..2_000, allocation in 0usize..2_500) {
            let idx = stride_indices(total, allocation);
            prop_assert_eq!(idx.len(), allocation.min(total));
            prop_assert!(idx.windows(2).all(|w| w[0] < w[1]));
            if allocation >= 1 {
                prop_assert_eq!(idx[0], 0);
            }
            if allocation >= 2 {
                prop_assert_eq!(*idx.last().unwrap_or(&0), total - 1);
            }
        }

        #[test]
        fn apply_output_is_sorted(
            stamps in prop::collection::vec(prop::option::of(0i64..10_000), 0..300),
            cap in 1usize..200,
        ) {
            let events: Vec<LogEvent> = stamps.iter().map(|s| event_at(*s, "p")).collect();
            let outcome = EventBudget::new(cap).with_floor(50).apply(vec![events]);

            prop_assert!(outcome.events.len() <= cap);
            prop_assert_eq!(outcome.events.len() + outcome.dropped, stamps.len());
            let sorted = outcome.events.windows(2).all(|w| {
                (w[0].timestamp.is_none(), w[0].timestamp) <= (w[1].timestamp.is_none(), w[1].timestamp)
            });
            prop_assert!(sorted);
        }
    }
}
