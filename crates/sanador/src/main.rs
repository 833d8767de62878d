//! Sanador CLI entry point

use clap::Parser;
use sanador::{
    handlers, Cli, CliConfig, CliResult, ColorChoice, Commands, LogFormat, Reporter, Verbosity,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(&config);

    let sanar_config = config.sanar_config()?;
    let reporter = Reporter::new(config.color.should_color(), config.verbosity.is_quiet());
    tracing::debug!(history_dir = %sanar_config.history.dir.display(), "configuration loaded");

    match cli.command {
        Commands::Stats(args) => {
            let store = sanar_config.history_store();
            print!("{}", handlers::execute_stats(&sanar_config, &store, &args)?);
        }
        Commands::Optimize(args) => {
            let store = sanar_config.history_store();
            print!("{}", handlers::execute_optimize(&sanar_config, &store, &args)?);
        }
        Commands::Healings(args) => {
            let store = sanar_config.history_store();
            print!("{}", handlers::execute_healings(&store, &args)?);
        }
        Commands::Prune(args) => {
            handlers::execute_prune(&sanar_config, &args, &reporter)?;
        }
        Commands::Reset(args) => handlers::execute_reset(&sanar_config, &args, &reporter)?,
        Commands::Config => print!("{}", handlers::render_config(&sanar_config)?),
        Commands::Ping => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(handlers::execute_ping(&sanar_config, &reporter))?;
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> CliConfig {
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        match cli.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    };

    let color: ColorChoice = cli.color.into();
    let log_format: LogFormat = cli.log_format.into();

    CliConfig::new()
        .with_verbosity(verbosity)
        .with_color(color)
        .with_log_format(log_format)
        .with_config_path(cli.config.clone())
        .with_history_dir(cli.history_dir.clone())
}

fn init_tracing(config: &CliConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.log_directive()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Pretty => builder.with_ansi(config.color.should_color()).init(),
        LogFormat::Json => builder.json().init(),
    }
}
