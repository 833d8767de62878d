//! CLI command definitions using clap

use crate::config::{ColorChoice, LogFormat};
use crate::output::OutputFormat;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sanador: inspect and maintain what Sanar has learned about your UI
#[derive(Parser, Debug)]
#[command(name = "sanador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to ./sanar.yaml when present)
    #[arg(long, global = true, env = "SANAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// History directory (overrides config and SANAR_HISTORY_DIR)
    #[arg(long, global = true)]
    pub history_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log format on stderr
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: LogFormatArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show learned wait patterns and their current adaptive timeouts
    Stats(StatsArgs),

    /// Suggest timeout changes from observed wait patterns (advisory only)
    Optimize(OptimizeArgs),

    /// List recorded locator healings
    Healings(HealingsArgs),

    /// Apply the healing retention cap to the healing log
    Prune(PruneArgs),

    /// Delete learned data
    Reset(ResetArgs),

    /// Print the effective configuration as YAML
    Config,

    /// Check that the suggestion service is reachable
    Ping,
}

/// Arguments for the stats command
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Arguments for the optimize command
#[derive(Parser, Debug)]
pub struct OptimizeArgs {
    /// Output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Arguments for the healings command
#[derive(Parser, Debug)]
pub struct HealingsArgs {
    /// Only show healings for this original locator
    #[arg(long)]
    pub locator: Option<String>,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Arguments for the prune command
#[derive(Parser, Debug)]
pub struct PruneArgs {
    /// Healed locators kept per original (defaults to the configured cap)
    #[arg(long)]
    pub max: Option<usize>,
}

/// Arguments for the reset command
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Delete the healing log
    #[arg(long)]
    pub healing: bool,

    /// Delete the wait-pattern log
    #[arg(long)]
    pub waits: bool,
}

impl ResetArgs {
    /// Which files to delete as `(healing, waits)`; neither flag means both
    #[must_use]
    pub const fn targets(&self) -> (bool, bool) {
        if self.healing || self.waits {
            (self.healing, self.waits)
        } else {
            (true, true)
        }
    }
}

/// Color argument
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Always use colors
    Always,
    /// Auto-detect
    #[default]
    Auto,
    /// Never use colors
    Never,
}

impl From<ColorArg> for ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Always => Self::Always,
            ColorArg::Auto => Self::Auto,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Log format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormatArg {
    /// Human-readable
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// Report format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum FormatArg {
    /// Human-readable table
    #[default]
    Text,
    /// JSON document
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "sanador",
            "stats",
            "--history-dir",
            "/tmp/h",
            "-vv",
            "--color",
            "never",
        ])
        .unwrap();
        assert_eq!(cli.history_dir, Some(PathBuf::from("/tmp/h")));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.color, ColorArg::Never));
        assert!(matches!(cli.command, Commands::Stats(_)));
    }

    #[test]
    fn test_optimize_json_format() {
        let cli = Cli::try_parse_from(["sanador", "optimize", "--format", "json"]).unwrap();
        match cli.command {
            Commands::Optimize(args) => assert!(matches!(args.format, FormatArg::Json)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(Cli::try_parse_from(["sanador", "optimize", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_reset_targets() {
        let both = ResetArgs {
            healing: false,
            waits: false,
        };
        assert_eq!(both.targets(), (true, true));
        let only_waits = ResetArgs {
            healing: false,
            waits: true,
        };
        assert_eq!(only_waits.targets(), (false, true));
    }

    #[test]
    fn test_color_conversion() {
        assert_eq!(ColorChoice::from(ColorArg::Always), ColorChoice::Always);
        assert_eq!(ColorChoice::from(ColorArg::Never), ColorChoice::Never);
        assert_eq!(LogFormat::from(LogFormatArg::Json), LogFormat::Json);
    }
}
