//! Learned wait timings.
//!
//! A [`WaitPattern`] keeps a rolling window of observed wait durations for one
//! locator key. Durations are stored in seconds so the persisted file reads
//! naturally (`"avgTime": 1.25`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Observations kept per locator key unless configured otherwise
pub const DEFAULT_WINDOW: usize = 50;

/// Rolling timing statistics for one locator key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WaitPattern {
    times: VecDeque<f64>,
    successes: u64,
    failures: u64,
    avg_time: f64,
    min_time: f64,
    max_time: f64,
}

impl WaitPattern {
    /// Create an empty pattern
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation, keeping at most `window` durations
    pub fn record(&mut self, elapsed: Duration, success: bool, window: usize) {
        self.times.push_back(elapsed.as_secs_f64());
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.normalize(window);
    }

    /// Enforce the window bound and recompute derived statistics
    pub fn normalize(&mut self, window: usize) {
        let window = window.max(1);
        while self.times.len() > window {
            self.times.pop_front();
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.times.is_empty() {
            self.avg_time = 0.0;
            self.min_time = 0.0;
            self.max_time = 0.0;
            return;
        }
        let sum: f64 = self.times.iter().sum();
        self.avg_time = sum / self.times.len() as f64;
        self.min_time = self.times.iter().copied().fold(f64::INFINITY, f64::min);
        self.max_time = self.times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    }

    /// Observed durations in seconds, oldest first
    pub fn times(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.times.iter().copied()
    }

    /// Number of durations currently in the window
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.times.len()
    }

    /// Successful waits ever recorded
    #[must_use]
    pub const fn successes(&self) -> u64 {
        self.successes
    }

    /// Failed waits ever recorded
    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.failures
    }

    /// Total observations ever recorded
    #[must_use]
    pub const fn observations(&self) -> u64 {
        self.successes + self.failures
    }

    /// Mean of the window, in seconds
    #[must_use]
    pub const fn avg_time(&self) -> f64 {
        self.avg_time
    }

    /// Minimum of the window, in seconds
    #[must_use]
    pub const fn min_time(&self) -> f64 {
        self.min_time
    }

    /// Maximum of the window, in seconds
    #[must_use]
    pub const fn max_time(&self) -> f64 {
        self.max_time
    }

    /// Share of observations that failed
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        match self.observations() {
            0 => 0.0,
            n => self.failures as f64 / n as f64,
        }
    }
}

/// Wait patterns keyed by locator, ordered for stable files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternTable(BTreeMap<String, WaitPattern>);

impl PatternTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pattern for a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&WaitPattern> {
        self.0.get(key)
    }

    /// Pattern for a key, created on first use
    pub fn entry(&mut self, key: &str) -> &mut WaitPattern {
        self.0.entry(key.to_string()).or_default()
    }

    /// Insert or replace a pattern
    pub fn insert(&mut self, key: impl Into<String>, pattern: WaitPattern) {
        self.0.insert(key.into(), pattern);
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &WaitPattern)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply the window bound to every pattern
    pub fn normalize(&mut self, window: usize) {
        for pattern in self.0.values_mut() {
            pattern.normalize(window);
        }
    }

    /// Merge `other` into `self`.
    ///
    /// Per key, the pattern with more total observations wins; on a tie the
    /// pattern from `other` wins.
    pub fn merge_from(&mut self, other: &Self) {
        for (key, theirs) in &other.0 {
            let keep_ours = self
                .0
                .get(key)
                .is_some_and(|ours| ours.observations() > theirs.observations());
            if !keep_ours {
                self.0.insert(key.clone(), theirs.clone());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    mod wait_pattern_tests {
        use super::*;

        #[test]
        fn test_new_is_empty() {
            let p = WaitPattern::new();
            assert_eq!(p.window_len(), 0);
            assert_eq!(p.observations(), 0);
            assert_eq!(p.failure_rate(), 0.0);
        }

        #[test]
        fn test_statistics() {
            let mut p = WaitPattern::new();
            p.record(secs(1.0), true, 50);
            p.record(secs(3.0), true, 50);
            p.record(secs(2.0), false, 50);
            assert_eq!(p.successes(), 2);
            assert_eq!(p.failures(), 1);
            assert!((p.avg_time() - 2.0).abs() < 1e-9);
            assert!((p.min_time() - 1.0).abs() < 1e-9);
            assert!((p.max_time() - 3.0).abs() < 1e-9);
            assert!((p.failure_rate() - 1.0 / 3.0).abs() < 1e-9);
        }

        #[test]
        fn test_oldest_dropped_first() {
            let mut p = WaitPattern::new();
            for i in 0..5 {
                p.record(secs(f64::from(i)), true, 3);
            }
            assert_eq!(p.times().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
            assert!((p.min_time() - 2.0).abs() < 1e-9);
            // counters are not windowed
            assert_eq!(p.successes(), 5);
        }

        #[test]
        fn test_normalize_shrinks_oversized_window() {
            let mut p = WaitPattern::new();
            for _ in 0..80 {
                p.record(secs(0.5), true, 100);
            }
            assert_eq!(p.window_len(), 80);
            p.normalize(DEFAULT_WINDOW);
            assert_eq!(p.window_len(), DEFAULT_WINDOW);
        }

        #[test]
        fn test_zero_window_keeps_one() {
            let mut p = WaitPattern::new();
            p.record(secs(1.0), true, 0);
            p.record(secs(2.0), true, 0);
            assert_eq!(p.window_len(), 1);
            assert!((p.avg_time() - 2.0).abs() < 1e-9);
        }

        #[test]
        fn test_serialized_field_names() {
            let mut p = WaitPattern::new();
            p.record(secs(1.5), true, 50);
            let json = serde_json::to_string(&p).unwrap();
            assert!(json.contains("\"times\":[1.5]"));
            assert!(json.contains("\"avgTime\":1.5"));
            assert!(json.contains("\"minTime\""));
            assert!(json.contains("\"maxTime\""));
            assert!(json.contains("\"successes\":1"));
        }

        #[test]
        fn test_deserialize_recomputes_nothing_until_normalized() {
            let json = r#"{"times":[1.0,2.0,3.0],"successes":3,"failures":0,"avgTime":9.0}"#;
            let mut p: WaitPattern = serde_json::from_str(json).unwrap();
            assert!((p.avg_time() - 9.0).abs() < 1e-9);
            p.normalize(50);
            assert!((p.avg_time() - 2.0).abs() < 1e-9);
        }
    }

    mod pattern_table_tests {
        use super::*;

        #[test]
        fn test_entry_creates_pattern() {
            let mut table = PatternTable::new();
            table.entry("#a").record(secs(1.0), true, 50);
            assert_eq!(table.len(), 1);
            assert_eq!(table.get("#a").unwrap().successes(), 1);
        }

        #[test]
        fn test_merge_prefers_more_observations() {
            let mut disk = PatternTable::new();
            for _ in 0..20 {
                disk.entry("#a").record(secs(1.0), true, 50);
            }
            disk.entry("#b").record(secs(1.0), true, 50);

            let mut memory = PatternTable::new();
            for _ in 0..5 {
                memory.entry("#a").record(secs(9.0), true, 50);
            }
            for _ in 0..3 {
                memory.entry("#b").record(secs(2.0), true, 50);
            }
            memory.entry("#c").record(secs(4.0), false, 50);

            disk.merge_from(&memory);
            assert_eq!(disk.get("#a").unwrap().observations(), 20);
            assert_eq!(disk.get("#b").unwrap().observations(), 3);
            assert_eq!(disk.get("#c").unwrap().failures(), 1);
        }

        #[test]
        fn test_merge_tie_takes_incoming() {
            let mut disk = PatternTable::new();
            disk.entry("#a").record(secs(1.0), true, 50);
            let mut memory = PatternTable::new();
            memory.entry("#a").record(secs(5.0), true, 50);
            disk.merge_from(&memory);
            assert!((disk.get("#a").unwrap().avg_time() - 5.0).abs() < 1e-9);
        }

        #[test]
        fn test_iter_is_sorted() {
            let mut table = PatternTable::new();
            table.entry("#z");
            table.entry("#a");
            let keys: Vec<_> = table.iter().map(|(k, _)| k).collect();
            assert_eq!(keys, vec!["#a", "#z"]);
        }
    }

    proptest! {
        #[test]
        fn prop_window_never_exceeds_bound(
            observations in proptest::collection::vec((0u64..10_000, any::<bool>()), 0..300),
        ) {
            let mut p = WaitPattern::new();
            for (ms, success) in &observations {
                p.record(Duration::from_millis(*ms), *success, DEFAULT_WINDOW);
                prop_assert!(p.window_len() <= DEFAULT_WINDOW);
            }
            prop_assert_eq!(p.observations(), observations.len() as u64);
        }

        #[test]
        fn prop_stats_are_ordered(
            times in proptest::collection::vec(0u64..60_000, 1..120),
        ) {
            let mut p = WaitPattern::new();
            for ms in &times {
                p.record(Duration::from_millis(*ms), true, DEFAULT_WINDOW);
            }
            prop_assert!(p.min_time() <= p.avg_time() + 1e-9);
            prop_assert!(p.avg_time() <= p.max_time() + 1e-9);
        }
    }
}
