//! `sams counts` - refresh the expected-count sidecars

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use sams_core::fmt_num;
use sams_etl::{ApiError, ExpectedCounts, PartitionFilter};

use super::EntityArg;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct CountsArgs {
    /// Entity type to refresh
    #[arg(value_enum, default_value = "all")]
    pub entity: EntityArg,
}

pub fn run(args: CountsArgs, config: &Config) -> Result<ExitCode> {
    let catalog = config.catalog()?;
    let (client, _tokens) = super::connect(config)?;
    let policy = config.sync.page_policy();

    let mut table = super::table(&["Entity", "Partitions", "Counted", "Records", "File"]);
    for entity in args.entity.entities() {
        let partitions = catalog.enumerate(entity, &PartitionFilter::default())?;
        let counts = match ExpectedCounts::fetch(&client, &partitions, &policy) {
            Ok(counts) => counts,
            Err(ApiError::Auth(e)) => {
                log::error!("{e}");
                return Ok(ExitCode::from(2));
            }
            Err(e) => return Err(e.into()),
        };

        let path = ExpectedCounts::path(&config.store.state_dir, entity);
        counts.save(&path)?;
        let total: u64 = partitions.iter().filter_map(|k| counts.get(k)).sum();
        log::info!("{entity}: {} of {} partitions counted", counts.len(), partitions.len());

        table.add_row(vec![
            entity.to_string(),
            partitions.len().to_string(),
            counts.len().to_string(),
            fmt_num(total as usize),
            path.display().to_string(),
        ]);
    }
    eprintln!("\n{table}");
    Ok(ExitCode::SUCCESS)
}
