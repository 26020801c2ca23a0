//! `sams sync` - download, validate and load partitions

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color};
use sams_core::{SharedProgress, Shutdown, fmt_num};
use sams_etl::{Orchestrator, RunError, RunSummary, SyncOptions};

use super::{EntityArg, PartitionArgs};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Entity type to sync
    #[arg(value_enum, default_value = "all")]
    pub entity: EntityArg,

    #[command(flatten)]
    pub partitions: PartitionArgs,

    /// Re-fetch partitions that are already checkpointed
    #[arg(long)]
    pub force: bool,

    /// Insert each partition in one transaction (per-record fallback on duplicates)
    #[arg(long)]
    pub bulk: bool,

    /// Number of partitions synced in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Attempts per page before a partition is marked degraded
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// DuckDB database file (default: [store] path)
    #[arg(long)]
    pub db: Option<PathBuf>,
}

pub fn run(args: SyncArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let mut settings = config.sync.clone();
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    if let Some(max_attempts) = args.max_attempts {
        settings.max_attempts = max_attempts;
    }
    settings.bulk |= args.bulk;
    let workers = settings.workers.max(1);

    let catalog = config.catalog()?;
    let (client, tokens) = super::connect(config)?;

    // Fail before touching any partition if the credentials are wrong
    if let Err(e) = tokens.auth_header() {
        log::error!("{e}");
        return Ok(ExitCode::from(2));
    }

    let shutdown = Shutdown::new();
    shutdown
        .install_signal_handlers()
        .context("Failed to install signal handlers")?;
    let store = super::open_store(config, args.db.as_deref(), workers)?;
    log::info!("Syncing into {} ({workers} workers)", store.location());

    let orchestrator = Orchestrator::new(&catalog, &client, &store, shutdown.clone(), progress.clone());
    let mut summaries = Vec::new();
    for entity in args.entity.entities() {
        if shutdown.is_requested() {
            break;
        }
        let Some(filter) = args.partitions.filter(&catalog, entity)? else {
            log::debug!("{entity}: no requested program applies");
            continue;
        };
        let options = SyncOptions {
            filter,
            exclude_completed: !args.force,
            bulk: settings.bulk,
            workers,
            page_policy: settings.page_policy(),
            lock_policy: settings.lock_policy(),
            counts_dir: Some(config.store.state_dir.clone()),
            counts_max_age: settings.counts_max_age(),
        };
        match orchestrator.run(entity, &options) {
            Ok(summary) => summaries.push(summary),
            Err(RunError::Auth(e)) => {
                log::error!("{entity}: {e}; run aborted");
                print_summaries(&summaries, progress);
                return Ok(ExitCode::from(2));
            }
            Err(e) => return Err(e).with_context(|| format!("{entity}: sync failed")),
        }
    }

    print_summaries(&summaries, progress);
    log::debug!(
        "{} data requests, {} token exchanges",
        client.request_count(),
        tokens.exchanges()
    );

    if shutdown.is_requested() || summaries.iter().any(|s| s.interrupted) {
        log::warn!("Interrupted");
        return Ok(ExitCode::from(130));
    }
    if summaries.iter().all(RunSummary::is_clean) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn print_summaries(summaries: &[RunSummary], progress: &SharedProgress) {
    if summaries.is_empty() || !progress.is_tty() {
        // non-TTY: RunSummary::log already covered it
        return;
    }
    let mut table = super::table(&[
        "Entity",
        "Partitions",
        "Loaded",
        "Empty",
        "Skipped",
        "Degraded",
        "Failed",
        "Inserted",
        "Duplicates",
        "Rejected",
        "Elapsed",
    ]);
    for summary in summaries {
        let records = summary.records();
        let problem = |n: usize| {
            if n > 0 {
                Cell::new(n).fg(Color::Red)
            } else {
                Cell::new(n)
            }
        };
        table.add_row(vec![
            Cell::new(summary.entity),
            Cell::new(summary.total()),
            Cell::new(summary.loaded()),
            Cell::new(summary.empty()),
            Cell::new(summary.skipped()),
            problem(summary.degraded()),
            problem(summary.failed()),
            Cell::new(fmt_num(records.inserted as usize)),
            Cell::new(fmt_num(records.duplicates as usize)),
            Cell::new(fmt_num(records.rejected as usize)),
            Cell::new(format!("{:.1}s", summary.elapsed.as_secs_f64())),
        ]);
    }
    eprintln!("\n{table}");
}
