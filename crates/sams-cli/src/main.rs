//! sams - Sync SAMS student and institute enrollment data into DuckDB
//!
//! Downloads every configured program/year partition from the SAMS API,
//! validates it and loads it idempotently. Completed partitions are
//! checkpointed, so rerunning `sams sync` only fetches what is missing.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sams_core::{ProgressContext, Verbosity};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "sams")]
#[command(about = "Extract, validate and load SAMS enrollment data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./sams.toml or ~/.config/sams/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Append log lines to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Download and load partitions
    Sync(cmd::sync::SyncArgs),
    /// Show checkpoint state and row counts per partition
    Status(cmd::status::StatusArgs),
    /// Refresh expected record counts from the API
    Counts(cmd::counts::CountsArgs),
    /// Delete a partition's rows and checkpoint
    Reset(cmd::reset::ResetArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(ProgressContext::new());

    // TTY: logs go through the progress bars; a log file takes everything instead
    let multi = progress.is_tty().then(|| progress.multi());
    let verbosity = Verbosity::from_flags(cli.quiet, cli.debug);
    if let Err(e) = sams_core::init_logging(verbosity, multi, cli.log_file.as_deref()) {
        eprintln!("Failed to open log file: {e}");
        return ExitCode::from(2);
    }

    let config = match cli.config {
        Some(path) => Config::from_file(&path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(2);
        }
    };

    let result: Result<ExitCode> = match cli.command {
        Command::Sync(args) => cmd::sync::run(args, &config, &progress),
        Command::Status(args) => cmd::status::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Counts(args) => cmd::counts::run(args, &config),
        Command::Reset(args) => cmd::reset::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            show_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn show_config(config: &Config) {
    let mut table = cmd::table(&["Setting", "Value"]);
    let set = |value: &str| if value.is_empty() { "not set" } else { "configured" };

    table.add_row(vec!["API base URL", &config.api.base_url]);
    table.add_row(vec!["API username", set(&config.api.username)]);
    table.add_row(vec!["API password", set(&config.api.password)]);
    table.add_row(vec!["Request timeout", &format!("{}s", config.api.timeout_secs)]);
    table.add_row(vec!["Token TTL", &format!("{}s", config.api.token_ttl_secs)]);
    table.add_row(vec!["Database", &config.store.path.display().to_string()]);
    table.add_row(vec!["State directory", &config.store.state_dir.display().to_string()]);
    table.add_row(vec!["Workers", &config.sync.workers.to_string()]);
    table.add_row(vec![
        "Max attempts",
        &format!("{} (backoff {}ms)", config.sync.max_attempts, config.sync.backoff_ms),
    ]);
    table.add_row(vec![
        "Lock retries",
        &format!("{} (backoff {}ms)", config.sync.lock_retries, config.sync.lock_backoff_ms),
    ]);
    table.add_row(vec!["Bulk insert", if config.sync.bulk { "yes" } else { "no" }]);
    table.add_row(vec!["Clamp years", if config.sync.clamp_years { "yes" } else { "no" }]);

    for (entity, ranges) in [("student", &config.programs.student), ("institute", &config.programs.institute)] {
        let programs: Vec<String> = ranges
            .iter()
            .map(|(name, r)| format!("{name} {}-{}", r.min_year, r.max_year))
            .collect();
        table.add_row(vec![format!("Programs ({entity})"), programs.join(", ")]);
    }

    eprintln!("\n{table}");
}
