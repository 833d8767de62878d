//! Optimize command handler

use crate::commands::OptimizeArgs;
use crate::error::CliResult;
use crate::output::{format_secs, OutputFormat};
use sanar::{optimize_patterns, HistoryStore, SanarConfig, SuggestionKind, WaitSuggestion};
use std::fmt::Write as _;

/// Render the advisory report
#[must_use]
pub fn render_report_text(suggestions: &[WaitSuggestion]) -> String {
    if suggestions.is_empty() {
        return "No timeout changes suggested.\n".to_string();
    }
    let mut out = String::new();
    for s in suggestions {
        let why = match s.kind {
            SuggestionKind::Reduce => format!(
                "consistently fast (avg {}, max {})",
                format_secs(s.avg_time),
                format_secs(s.max_time)
            ),
            SuggestionKind::Increase => {
                format!("fails {:.0}% of waits", s.failure_rate * 100.0)
            }
        };
        let _ = writeln!(
            out,
            "{:<8} {}: {why}; suggested timeout {}ms",
            s.kind.to_string(),
            s.locator_key,
            s.suggested_timeout_ms
        );
    }
    out.push_str("\nSuggestions are advisory; nothing has been changed.\n");
    out
}

/// Execute the optimize command
pub fn execute_optimize(
    config: &SanarConfig,
    store: &dyn HistoryStore,
    args: &OptimizeArgs,
) -> CliResult<String> {
    let suggestions = optimize_patterns(&store.load_patterns(), &config.waits);
    match OutputFormat::from(args.format) {
        OutputFormat::Text => Ok(render_report_text(&suggestions)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&suggestions)? + "\n"),
    }
}
