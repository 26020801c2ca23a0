//! `sams reset` - drop a partition's rows and checkpoint so the next sync re-fetches it

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use sams_etl::CheckpointStore;

use super::{EntityArg, PartitionArgs};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Entity type to reset
    #[arg(value_enum)]
    pub entity: EntityArg,

    #[command(flatten)]
    pub partitions: PartitionArgs,

    /// Actually delete (otherwise dry-run)
    #[arg(long)]
    pub confirm: bool,

    /// DuckDB database file (default: [store] path)
    #[arg(long)]
    pub db: Option<PathBuf>,
}

pub fn run(args: ResetArgs, config: &Config) -> Result<()> {
    if args.partitions.program.is_empty() || args.partitions.year.is_empty() {
        anyhow::bail!("reset needs --program and --year");
    }
    let catalog = config.catalog()?;
    let store = super::open_store(config, args.db.as_deref(), 1)?;
    let checkpoints = CheckpointStore::new(&store);

    let mut table = super::table(&["Partition", "Rows", "Checkpoint"]);
    let mut total_rows = 0u64;
    for entity in args.entity.entities() {
        let Some(filter) = args.partitions.filter(&catalog, entity)? else {
            continue;
        };
        for key in catalog.enumerate(entity, &filter)? {
            if args.confirm {
                let removed = store.delete_partition(&key)? as u64;
                let cleared = checkpoints.clear(&key)?;
                log::info!("{key}: deleted {removed} rows, checkpoint {}", if cleared { "cleared" } else { "absent" });
                total_rows += removed;
                table.add_row(vec![key.to_string(), removed.to_string(), cleared.to_string()]);
            } else {
                let rows = store.partition_rows(&key)?;
                let complete = checkpoints.is_complete(&key)?;
                total_rows += rows;
                table.add_row(vec![key.to_string(), rows.to_string(), complete.to_string()]);
            }
        }
    }

    eprintln!("\n{table}");
    if args.confirm {
        eprintln!("Deleted {total_rows} rows.");
    } else {
        eprintln!("Would delete {total_rows} rows. Run with --confirm to delete.");
    }
    Ok(())
}
