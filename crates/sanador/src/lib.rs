//! Sanador: operator CLI for Sanar
//!
//! Inspects and maintains the history Sanar learns while tests run: wait
//! patterns and their adaptive timeouts, the healing log, and the advisory
//! timeout report. Nothing here changes test behaviour unless the operator
//! prunes or resets the history.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod output;

pub use commands::{
    Cli, ColorArg, Commands, FormatArg, HealingsArgs, LogFormatArg, OptimizeArgs, PruneArgs,
    ResetArgs, StatsArgs,
};
pub use config::{CliConfig, ColorChoice, LogFormat, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{format_secs, OutputFormat, Reporter};
