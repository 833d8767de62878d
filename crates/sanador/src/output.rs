//! Output formatting and status reporting

use console::{style, Term};
use serde::{Deserialize, Serialize};

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Status lines on stderr; reports themselves go to stdout
#[derive(Debug)]
pub struct Reporter {
    term: Term,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl Reporter {
    /// Create a new reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            use_color,
            quiet,
        }
    }

    fn line(&self, symbol: &str, plain: &str, message: &str, paint: fn(&str) -> String) {
        let prefix = if self.use_color {
            paint(symbol)
        } else {
            plain.to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("✓", "OK", message, |s| style(s).green().bold().to_string());
    }

    /// Print a failure message, even in quiet mode
    pub fn failure(&self, message: &str) {
        self.line("✗", "FAIL", message, |s| style(s).red().bold().to_string());
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("⚠", "WARN", message, |s| style(s).yellow().bold().to_string());
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("ℹ", "INFO", message, |s| style(s).blue().bold().to_string());
    }
}

/// Format seconds the way the reports show them
#[must_use]
pub fn format_secs(secs: f64) -> String {
    format!("{secs:.3}s")
}
