//! History inspection and maintenance: stats, healings, prune, reset

use crate::commands::{HealingsArgs, PruneArgs, ResetArgs, StatsArgs};
use crate::error::{CliError, CliResult};
use crate::output::{format_secs, OutputFormat, Reporter};
use sanar::{HealingLog, HistoryStore, PatternTable, SanarConfig, WaitConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// One line of the stats table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRow {
    /// Locator key
    pub locator_key: String,
    /// Successful waits recorded
    pub successes: u64,
    /// Failed waits recorded
    pub failures: u64,
    /// Window mean, seconds
    pub avg_time: f64,
    /// Window maximum, seconds
    pub max_time: f64,
    /// Timeout the scheduler would apply now, milliseconds
    pub adaptive_timeout_ms: u64,
}

/// Build stats rows, ordered by locator key
#[must_use]
pub fn stats_rows(patterns: &PatternTable, waits: &WaitConfig) -> Vec<StatsRow> {
    patterns
        .iter()
        .map(|(key, pattern)| StatsRow {
            locator_key: key.to_string(),
            successes: pattern.successes(),
            failures: pattern.failures(),
            avg_time: pattern.avg_time(),
            max_time: pattern.max_time(),
            adaptive_timeout_ms: waits.timeout_for(Some(pattern)).as_millis() as u64,
        })
        .collect()
}

/// Render stats rows as an aligned table
#[must_use]
pub fn render_stats_text(rows: &[StatsRow]) -> String {
    if rows.is_empty() {
        return "No wait patterns recorded.\n".to_string();
    }
    let width = rows
        .iter()
        .map(|r| r.locator_key.len())
        .max()
        .unwrap_or(0)
        .max("LOCATOR".len());

    let mut out = format!(
        "{:<width$}  {:>6}  {:>6}  {:>9}  {:>9}  {:>9}\n",
        "LOCATOR", "OK", "FAIL", "AVG", "MAX", "TIMEOUT"
    );
    for row in rows {
        let _ = writeln!(
            out,
            "{:<width$}  {:>6}  {:>6}  {:>9}  {:>9}  {:>7}ms",
            row.locator_key,
            row.successes,
            row.failures,
            format_secs(row.avg_time),
            format_secs(row.max_time),
            row.adaptive_timeout_ms
        );
    }
    out
}

/// Execute the stats command
pub fn execute_stats(
    config: &SanarConfig,
    store: &dyn HistoryStore,
    args: &StatsArgs,
) -> CliResult<String> {
    let rows = stats_rows(&store.load_patterns(), &config.waits);
    match OutputFormat::from(args.format) {
        OutputFormat::Text => Ok(render_stats_text(&rows)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&rows)? + "\n"),
    }
}

/// Healings selected for display, keyed by original locator
#[must_use]
pub fn select_healings(log: &HealingLog, locator: Option<&str>) -> BTreeMap<String, Vec<String>> {
    log.iter()
        .filter(|(original, _)| locator.map_or(true, |wanted| *original == wanted))
        .map(|(original, healed)| (original.to_string(), healed.to_vec()))
        .collect()
}

/// Render healings, newest record last and marked
#[must_use]
pub fn render_healings_text(healings: &BTreeMap<String, Vec<String>>) -> String {
    if healings.is_empty() {
        return "No healings recorded.\n".to_string();
    }
    let mut out = String::new();
    for (original, healed) in healings {
        let _ = writeln!(out, "{original}");
        let last = healed.len().saturating_sub(1);
        for (i, locator) in healed.iter().enumerate() {
            let marker = if i == last { "  (latest)" } else { "" };
            let _ = writeln!(out, "  -> {locator}{marker}");
        }
    }
    out
}

/// Execute the healings command
pub fn execute_healings(store: &dyn HistoryStore, args: &HealingsArgs) -> CliResult<String> {
    let healings = select_healings(&store.load_healing(), args.locator.as_deref());
    match OutputFormat::from(args.format) {
        OutputFormat::Text => Ok(render_healings_text(&healings)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&healings)? + "\n"),
    }
}

/// Execute the prune command
pub fn execute_prune(
    config: &SanarConfig,
    args: &PruneArgs,
    reporter: &Reporter,
) -> CliResult<usize> {
    let cap = args.max.unwrap_or(config.healing.max_records_per_locator);
    if cap == 0 {
        return Err(CliError::invalid_argument("--max must be at least 1"));
    }
    let store = config.history_store();
    let dropped = store.prune_healing(cap)?;
    if dropped == 0 {
        reporter.info(&format!("Nothing to prune (cap {cap} per locator)"));
    } else {
        reporter.success(&format!(
            "Dropped {dropped} healed locator(s) from {}",
            store.healing_path().display()
        ));
    }
    Ok(dropped)
}

/// Execute the reset command
pub fn execute_reset(config: &SanarConfig, args: &ResetArgs, reporter: &Reporter) -> CliResult<()> {
    let (healing, waits) = args.targets();
    let store = config.history_store();
    let selected: Vec<_> = [(healing, store.healing_path()), (waits, store.patterns_path())]
        .into_iter()
        .filter(|(wanted, _)| *wanted)
        .map(|(_, path)| (path.to_path_buf(), path.exists()))
        .collect();

    store.reset(healing, waits)?;
    for (path, existed) in selected {
        if existed {
            reporter.success(&format!("Removed {}", path.display()));
        } else {
            reporter.warning(&format!("Nothing to remove at {}", path.display()));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::FormatArg;
    use sanar::{FileHistoryStore, MemoryHistoryStore};
    use std::time::Duration;
    use tempfile::TempDir;

    fn patterns() -> PatternTable {
        let mut table = PatternTable::new();
        for ms in [1000, 2000, 3000] {
            table
                .entry("#results")
                .record(Duration::from_millis(ms), true, 50);
        }
        table
            .entry("#slow")
            .record(Duration::from_millis(5000), false, 50);
        table
    }

    mod stats_tests {
        use super::*;

        #[test]
        fn test_rows_carry_adaptive_timeout() {
            let rows = stats_rows(&patterns(), &WaitConfig::default());
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].locator_key, "#results");
            assert_eq!(rows[0].adaptive_timeout_ms, 3000);
            // no success yet, so the default applies
            assert_eq!(rows[1].adaptive_timeout_ms, 5000);
        }

        #[test]
        fn test_text_table() {
            let text = render_stats_text(&stats_rows(&patterns(), &WaitConfig::default()));
            let lines: Vec<&str> = text.lines().collect();
            assert!(lines[0].starts_with("LOCATOR"));
            assert!(lines[1].contains("#results"));
            assert!(lines[1].contains("2.000s"));
            assert!(lines[1].ends_with("3000ms"));
        }

        #[test]
        fn test_empty_table() {
            assert_eq!(render_stats_text(&[]), "No wait patterns recorded.\n");
        }

        #[test]
        fn test_json_output() {
            let store = MemoryHistoryStore::new();
            store.save_patterns(&patterns()).unwrap();
            let out = execute_stats(
                &SanarConfig::default(),
                &store,
                &StatsArgs {
                    format: FormatArg::Json,
                },
            )
            .unwrap();
            let value: serde_json::Value = serde_json::from_str(&out).unwrap();
            assert_eq!(value[0]["locator_key"], "#results");
            assert_eq!(value[1]["failures"], 1);
        }
    }

    mod healings_tests {
        use super::*;

        fn log() -> HealingLog {
            let mut log = HealingLog::new();
            log.record("#login-button", "[data-testid=login]", 10);
            log.record("#login-button", "button.login", 10);
            log.record("#search", "input[name=q]", 10);
            log
        }

        #[test]
        fn test_filter_by_locator() {
            let selected = select_healings(&log(), Some("#search"));
            assert_eq!(selected.len(), 1);
            assert_eq!(selected["#search"], vec!["input[name=q]".to_string()]);
        }

        #[test]
        fn test_unknown_locator_selects_nothing() {
            assert!(select_healings(&log(), Some("#nope")).is_empty());
        }

        #[test]
        fn test_latest_marked() {
            let text = render_healings_text(&select_healings(&log(), None));
            assert!(text.contains("  -> [data-testid=login]\n"));
            assert!(text.contains("  -> button.login  (latest)\n"));
        }
    }

    mod maintenance_tests {
        use super::*;

        fn config(dir: &TempDir) -> SanarConfig {
            SanarConfig::default().with_history_dir(dir.path())
        }

        #[test]
        fn test_prune_drops_oldest() {
            let dir = TempDir::new().unwrap();
            let mut log = HealingLog::new();
            for i in 0..5 {
                log.record("#a", &format!("#b{i}"), 10);
            }
            FileHistoryStore::new(dir.path()).save_healing(&log).unwrap();

            let dropped = execute_prune(
                &config(&dir),
                &PruneArgs { max: Some(2) },
                &Reporter::new(false, true),
            )
            .unwrap();

            assert_eq!(dropped, 3);
            let kept = FileHistoryStore::new(dir.path()).load_healing();
            assert_eq!(kept.get("#a").unwrap(), ["#b3".to_string(), "#b4".to_string()]);
        }

        #[test]
        fn test_prune_zero_is_invalid() {
            let dir = TempDir::new().unwrap();
            let err = execute_prune(
                &config(&dir),
                &PruneArgs { max: Some(0) },
                &Reporter::new(false, true),
            )
            .unwrap_err();
            assert!(matches!(err, CliError::InvalidArgument { .. }));
        }

        #[test]
        fn test_reset_only_waits() {
            let dir = TempDir::new().unwrap();
            let store = FileHistoryStore::new(dir.path());
            let mut log = HealingLog::new();
            log.record("#a", "#b", 10);
            store.save(&log, &patterns()).unwrap();

            execute_reset(
                &config(&dir),
                &ResetArgs {
                    healing: false,
                    waits: true,
                },
                &Reporter::new(false, true),
            )
            .unwrap();

            assert!(store.healing_path().exists());
            assert!(!store.patterns_path().exists());
        }
    }
}
