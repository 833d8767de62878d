//! Command handlers
//!
//! Each handler module contains the execution logic for a CLI command and
//! pure render functions that the tests exercise directly.

pub mod config;
pub mod history;
pub mod optimize;
pub mod ping;

pub use config::render_config;
pub use history::{
    execute_healings, execute_prune, execute_reset, execute_stats, render_healings_text,
    render_stats_text, select_healings, stats_rows, StatsRow,
};
pub use optimize::{execute_optimize, render_report_text};
pub use ping::execute_ping;
