//! `sams status` - checkpoint and row counts per partition

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color};
use sams_etl::{CheckpointStore, CompletionKind, ExpectedCounts};

use super::{EntityArg, PartitionArgs};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Entity type to report
    #[arg(value_enum, default_value = "all")]
    pub entity: EntityArg,

    #[command(flatten)]
    pub partitions: PartitionArgs,

    /// DuckDB database file (default: [store] path)
    #[arg(long)]
    pub db: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let catalog = config.catalog()?;
    let store = super::open_store(config, args.db.as_deref(), 1)?;
    let checkpoints = CheckpointStore::new(&store);

    let mut table = super::table(&["Partition", "Checkpoint", "Rows", "Expected", "Completed at"]);
    let mut pending = 0usize;
    let mut shown = 0usize;

    for entity in args.entity.entities() {
        let Some(filter) = args.partitions.filter(&catalog, entity)? else {
            continue;
        };
        let partitions = catalog.enumerate(entity, &filter)?;
        let done: BTreeMap<_, _> = checkpoints
            .list(entity)?
            .into_iter()
            .map(|c| (c.key, c))
            .collect();
        let rows = store.partition_counts(entity)?;
        let expected = ExpectedCounts::load(&ExpectedCounts::path(&config.store.state_dir, entity), entity)?;

        for key in partitions {
            let stored = rows.get(&key).copied().unwrap_or(0);
            let expected_cell = match expected.get(&key) {
                Some(n) if n > stored => Cell::new(n).fg(Color::Yellow),
                Some(n) => Cell::new(n),
                None => Cell::new("-").fg(Color::DarkGrey),
            };
            let (state, completed_at) = match done.get(&key) {
                Some(c) => {
                    let color = match c.kind {
                        CompletionKind::Loaded => Color::Green,
                        CompletionKind::Empty => Color::DarkGrey,
                    };
                    (Cell::new(c.kind).fg(color), Cell::new(&c.completed_at))
                }
                None => {
                    pending += 1;
                    (Cell::new("pending").fg(Color::Yellow), Cell::new("-"))
                }
            };
            table.add_row(vec![
                Cell::new(key),
                state,
                Cell::new(stored),
                expected_cell,
                completed_at,
            ]);
            shown += 1;
        }
    }

    if shown == 0 {
        eprintln!("No partitions selected.");
        return Ok(());
    }
    eprintln!("\n{table}");
    eprintln!("{shown} partitions, {} complete, {pending} pending", shown - pending);
    Ok(())
}
