//! Durable store of learned healing and timing data.
//!
//! Two human-diffable JSON files, one per data set:
//!
//! - healing log: `{ "<original locator>": ["<healed>", ...] }`
//! - wait patterns: `{ "<locator key>": { "times": [..], "successes": n, ... } }`
//!
//! Loading is best-effort: a missing or corrupt file is an empty data set.
//! Saving re-reads the file, merges the caller's view into it and replaces it
//! atomically, so parallel workers sharing a directory rarely lose updates and
//! never leave a torn file behind. Both files can be deleted at any time to
//! reset learning.

use crate::config::HistoryConfig;
use crate::pattern::PatternTable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Healed locators kept per original when no cap is configured
pub const DEFAULT_MAX_RECORDS_PER_LOCATOR: usize = 10;

/// Errors writing history files
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure
    #[error("History I/O error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Serialization failure
    #[error("History serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The store refused the write (used by test doubles)
    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Original locator -> healed locators, most recent last
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealingLog(BTreeMap<String, Vec<String>>);

impl HealingLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `original -> healed`, keeping at most `cap` entries for `original`.
    ///
    /// An already known healed locator moves to the most recent position.
    /// Returns `false` if the log already ended with this healing.
    pub fn record(&mut self, original: &str, healed: &str, cap: usize) -> bool {
        let list = self.0.entry(original.to_string()).or_default();
        if list.last().is_some_and(|last| last == healed) {
            return false;
        }
        list.retain(|h| h != healed);
        list.push(healed.to_string());
        let cap = cap.max(1);
        if list.len() > cap {
            let excess = list.len() - cap;
            list.drain(..excess);
        }
        true
    }

    /// Healed locators for `original`, oldest first
    #[must_use]
    pub fn get(&self, original: &str) -> Option<&[String]> {
        self.0.get(original).map(Vec::as_slice)
    }

    /// Most recent healed locator for `original`
    #[must_use]
    pub fn latest(&self, original: &str) -> Option<&str> {
        self.0
            .get(original)
            .and_then(|list| list.last())
            .map(String::as_str)
    }

    /// Whether `original -> healed` is recorded
    #[must_use]
    pub fn contains(&self, original: &str, healed: &str) -> bool {
        self.get(original)
            .is_some_and(|list| list.iter().any(|h| h == healed))
    }

    /// Iterate in original-locator order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of original locators
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total healed locators across all originals
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Drop the oldest entries beyond `cap` per original; returns how many were dropped
    pub fn prune(&mut self, cap: usize) -> usize {
        let cap = cap.max(1);
        let mut dropped = 0;
        for list in self.0.values_mut() {
            if list.len() > cap {
                let excess = list.len() - cap;
                list.drain(..excess);
                dropped += excess;
            }
        }
        self.0.retain(|_, list| !list.is_empty());
        dropped
    }

    /// Merge `other` into `self`; entries from `other` become the most recent
    pub fn merge_from(&mut self, other: &Self, cap: usize) {
        for (original, healed) in other.iter() {
            for h in healed {
                self.record(original, h, cap);
            }
        }
    }
}

/// Everything the store holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    /// Healing records
    pub healing: HealingLog,
    /// Wait patterns
    pub patterns: PatternTable,
}

/// Durable key-value store shared by the resolver and the scheduler
pub trait HistoryStore: Send + Sync {
    /// Load the healing log; empty when absent or unreadable
    fn load_healing(&self) -> HealingLog;

    /// Load the wait-pattern table; empty when absent or unreadable
    fn load_patterns(&self) -> PatternTable;

    /// Persist the healing log
    fn save_healing(&self, log: &HealingLog) -> Result<(), PersistenceError>;

    /// Persist the wait-pattern table
    fn save_patterns(&self, patterns: &PatternTable) -> Result<(), PersistenceError>;

    /// Load both data sets
    fn load(&self) -> HistorySnapshot {
        HistorySnapshot {
            healing: self.load_healing(),
            patterns: self.load_patterns(),
        }
    }

    /// Persist both data sets
    fn save(&self, healing: &HealingLog, patterns: &PatternTable) -> Result<(), PersistenceError> {
        self.save_healing(healing)?;
        self.save_patterns(patterns)
    }
}

/// History kept in two JSON files
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    healing_path: PathBuf,
    patterns_path: PathBuf,
    max_records_per_locator: usize,
}

impl FileHistoryStore {
    /// Store using the default file names inside `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::from_config(&HistoryConfig::default().with_dir(dir))
    }

    /// Store at the configured paths
    #[must_use]
    pub fn from_config(config: &HistoryConfig) -> Self {
        Self {
            healing_path: config.healing_path(),
            patterns_path: config.patterns_path(),
            max_records_per_locator: DEFAULT_MAX_RECORDS_PER_LOCATOR,
        }
    }

    /// Set the per-locator retention cap applied when saving
    #[must_use]
    pub fn with_max_records_per_locator(mut self, max: usize) -> Self {
        self.max_records_per_locator = max.max(1);
        self
    }

    /// Healing log path
    #[must_use]
    pub fn healing_path(&self) -> &Path {
        &self.healing_path
    }

    /// Wait-pattern log path
    #[must_use]
    pub fn patterns_path(&self) -> &Path {
        &self.patterns_path
    }

    /// Delete the selected files; missing files are not an error
    pub fn reset(&self, healing: bool, patterns: bool) -> Result<(), PersistenceError> {
        let targets = [(healing, &self.healing_path), (patterns, &self.patterns_path)];
        for (selected, path) in targets {
            if !selected {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed history file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PersistenceError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Rewrite the healing log with `cap` applied; returns how many records were dropped
    pub fn prune_healing(&self, cap: usize) -> Result<usize, PersistenceError> {
        let mut log: HealingLog = read_json(&self.healing_path);
        let dropped = log.prune(cap);
        if dropped > 0 {
            write_atomic(&self.healing_path, &log)?;
        }
        Ok(dropped)
    }
}

impl HistoryStore for FileHistoryStore {
    fn load_healing(&self) -> HealingLog {
        read_json(&self.healing_path)
    }

    fn load_patterns(&self) -> PatternTable {
        read_json(&self.patterns_path)
    }

    fn save_healing(&self, log: &HealingLog) -> Result<(), PersistenceError> {
        let mut merged: HealingLog = read_json(&self.healing_path);
        merged.merge_from(log, self.max_records_per_locator);
        write_atomic(&self.healing_path, &merged)
    }

    fn save_patterns(&self, patterns: &PatternTable) -> Result<(), PersistenceError> {
        let mut merged: PatternTable = read_json(&self.patterns_path);
        merged.merge_from(patterns);
        write_atomic(&self.patterns_path, &merged)
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no history file, starting empty");
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable history file, starting empty");
            return T::default();
        }
    };
    if content.trim().is_empty() {
        return T::default();
    }
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "corrupt history file, starting empty");
        T::default()
    })
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| PersistenceError::io(dir, e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| PersistenceError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PersistenceError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| PersistenceError::io(path, e.error))?;
    debug!(path = %path.display(), bytes = json.len(), "history saved");
    Ok(())
}

/// In-memory store that counts saves, for tests and for running without learning persistence
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    state: Mutex<HistorySnapshot>,
    healing_saves: AtomicUsize,
    pattern_saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryHistoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with data
    #[must_use]
    pub fn with_snapshot(snapshot: HistorySnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Make every subsequent save fail
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful healing-log saves
    #[must_use]
    pub fn healing_saves(&self) -> usize {
        self.healing_saves.load(Ordering::SeqCst)
    }

    /// Number of successful pattern-table saves
    #[must_use]
    pub fn pattern_saves(&self) -> usize {
        self.pattern_saves.load(Ordering::SeqCst)
    }

    /// Current contents
    #[must_use]
    pub fn snapshot(&self) -> HistorySnapshot {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_available(&self) -> Result<(), PersistenceError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("saves disabled".into()));
        }
        Ok(())
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load_healing(&self) -> HealingLog {
        self.snapshot().healing
    }

    fn load_patterns(&self) -> PatternTable {
        self.snapshot().patterns
    }

    fn save_healing(&self, log: &HealingLog) -> Result<(), PersistenceError> {
        self.check_available()?;
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .healing = log.clone();
        self.healing_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn save_patterns(&self, patterns: &PatternTable) -> Result<(), PersistenceError> {
        self.check_available()?;
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .patterns = patterns.clone();
        self.pattern_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    mod healing_log_tests {
        use super::*;

        #[test]
        fn test_record_and_latest() {
            let mut log = HealingLog::new();
            assert!(log.record("#a", "#a2", 10));
            assert!(log.record("#a", "#a3", 10));
            assert_eq!(log.latest("#a"), Some("#a3"));
            assert_eq!(log.get("#a").unwrap(), ["#a2", "#a3"]);
            assert!(log.contains("#a", "#a2"));
            assert!(!log.contains("#b", "#a2"));
        }

        #[test]
        fn test_rerecord_moves_to_latest() {
            let mut log = HealingLog::new();
            log.record("#a", "x", 10);
            log.record("#a", "y", 10);
            assert!(log.record("#a", "x", 10));
            assert_eq!(log.get("#a").unwrap(), ["y", "x"]);
            assert!(!log.record("#a", "x", 10));
        }

        #[test]
        fn test_cap_drops_oldest() {
            let mut log = HealingLog::new();
            for i in 0..5 {
                log.record("#a", &format!("h{i}"), 3);
            }
            assert_eq!(log.get("#a").unwrap(), ["h2", "h3", "h4"]);
            assert_eq!(log.total_records(), 3);
        }

        #[test]
        fn test_prune() {
            let mut log = HealingLog::new();
            for i in 0..6 {
                log.record("#a", &format!("h{i}"), 100);
            }
            log.record("#b", "only", 100);
            assert_eq!(log.prune(2), 4);
            assert_eq!(log.get("#a").unwrap(), ["h4", "h5"]);
            assert_eq!(log.get("#b").unwrap(), ["only"]);
        }

        #[test]
        fn test_merge_union_keeps_incoming_recent() {
            let mut disk = HealingLog::new();
            disk.record("#a", "old", 10);
            disk.record("#a", "shared", 10);
            let mut memory = HealingLog::new();
            memory.record("#a", "shared", 10);
            memory.record("#a", "new", 10);
            memory.record("#b", "b1", 10);
            disk.merge_from(&memory, 10);
            assert_eq!(disk.get("#a").unwrap(), ["old", "shared", "new"]);
            assert_eq!(disk.latest("#b"), Some("b1"));
        }

        #[test]
        fn test_file_format_is_plain_map() {
            let mut log = HealingLog::new();
            log.record("#login-button", "[data-testid=login]", 10);
            let json = serde_json::to_string(&log).unwrap();
            assert_eq!(json, r##"{"#login-button":["[data-testid=login]"]}"##);
        }
    }

    mod file_store_tests {
        use super::*;

        #[test]
        fn test_missing_files_load_empty() {
            let dir = TempDir::new().unwrap();
            let store = FileHistoryStore::new(dir.path());
            let snapshot = store.load();
            assert!(snapshot.healing.is_empty());
            assert!(snapshot.patterns.is_empty());
        }

        #[test]
        fn test_corrupt_files_load_empty() {
            let dir = TempDir::new().unwrap();
            let store = FileHistoryStore::new(dir.path());
            std::fs::write(store.healing_path(), "{not json").unwrap();
            std::fs::write(store.patterns_path(), "[1,2,3]").unwrap();
            assert!(store.load_healing().is_empty());
            assert!(store.load_patterns().is_empty());
        }

        #[test]
        fn test_save_then_load() {
            let dir = TempDir::new().unwrap();
            let store = FileHistoryStore::new(dir.path().join("nested"));
            let mut log = HealingLog::new();
            log.record("#a", "#b", 10);
            let mut patterns = PatternTable::new();
            patterns
                .entry("#a")
                .record(Duration::from_millis(1500), true, 50);

            store.save(&log, &patterns).unwrap();

            let loaded = store.load();
            assert_eq!(loaded.healing, log);
            assert_eq!(loaded.patterns, patterns);
        }

        #[test]
        fn test_save_merges_with_other_writer() {
            let dir = TempDir::new().unwrap();
            let worker_a = FileHistoryStore::new(dir.path());
            let worker_b = FileHistoryStore::new(dir.path());

            let mut log_a = HealingLog::new();
            log_a.record("#a", "#a-healed", 10);
            worker_a.save_healing(&log_a).unwrap();

            let mut log_b = HealingLog::new();
            log_b.record("#b", "#b-healed", 10);
            worker_b.save_healing(&log_b).unwrap();

            let merged = worker_a.load_healing();
            assert_eq!(merged.latest("#a"), Some("#a-healed"));
            assert_eq!(merged.latest("#b"), Some("#b-healed"));
        }

        #[test]
        fn test_save_applies_retention_cap() {
            let dir = TempDir::new().unwrap();
            let store = FileHistoryStore::new(dir.path()).with_max_records_per_locator(2);
            let mut log = HealingLog::new();
            for i in 0..4 {
                log.record("#a", &format!("h{i}"), 100);
            }
            store.save_healing(&log).unwrap();
            assert_eq!(store.load_healing().get("#a").unwrap(), ["h2", "h3"]);
        }

        #[test]
        fn test_files_are_pretty_json() {
            let dir = TempDir::new().unwrap();
            let store = FileHistoryStore::new(dir.path());
            let mut log = HealingLog::new();
            log.record("#a", "#b", 10);
            store.save_healing(&log).unwrap();
            let text = std::fs::read_to_string(store.healing_path()).unwrap();
            assert!(text.contains('\n'));
            assert!(text.ends_with('\n'));
        }

        #[test]
        fn test_reset_removes_selected_files() {
            let dir = TempDir::new().unwrap();
            let store = FileHistoryStore::new(dir.path());
            let mut log = HealingLog::new();
            log.record("#a", "#b", 10);
            let mut patterns = PatternTable::new();
            patterns.entry("#a").record(Duration::from_secs(1), true, 50);
            store.save(&log, &patterns).unwrap();

            store.reset(true, false).unwrap();
            assert!(!store.healing_path().exists());
            assert!(store.patterns_path().exists());

            store.reset(true, true).unwrap();
            assert!(!store.patterns_path().exists());
        }

        #[test]
        fn test_prune_healing_rewrites_file() {
            let dir = TempDir::new().unwrap();
            let store = FileHistoryStore::new(dir.path()).with_max_records_per_locator(50);
            let mut log = HealingLog::new();
            for i in 0..8 {
                log.record("#a", &format!("h{i}"), 50);
            }
            store.save_healing(&log).unwrap();
            assert_eq!(store.prune_healing(3).unwrap(), 5);
            assert_eq!(store.load_healing().get("#a").unwrap().len(), 3);
            assert_eq!(store.prune_healing(3).unwrap(), 0);
        }
    }

    mod memory_store_tests {
        use super::*;

        #[test]
        fn test_counts_saves() {
            let store = MemoryHistoryStore::new();
            store.save_healing(&HealingLog::new()).unwrap();
            store.save_patterns(&PatternTable::new()).unwrap();
            store.save_patterns(&PatternTable::new()).unwrap();
            assert_eq!(store.healing_saves(), 1);
            assert_eq!(store.pattern_saves(), 2);
        }

        #[test]
        fn test_failing_saves() {
            let store = MemoryHistoryStore::new();
            store.fail_saves(true);
            assert!(store.save_healing(&HealingLog::new()).is_err());
            assert_eq!(store.healing_saves(), 0);
        }

        #[test]
        fn test_with_snapshot() {
            let mut healing = HealingLog::new();
            healing.record("#a", "#b", 10);
            let store = MemoryHistoryStore::with_snapshot(HistorySnapshot {
                healing,
                patterns: PatternTable::new(),
            });
            assert_eq!(store.load_healing().latest("#a"), Some("#b"));
        }
    }
}
