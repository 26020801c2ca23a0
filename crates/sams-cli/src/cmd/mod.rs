//! Subcommands and the pieces they share

pub mod counts;
pub mod reset;
pub mod status;
pub mod sync;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use sams_core::HttpTransport;
use sams_etl::{
    AdmissionVariant, ApiClient, Catalog, DuckStore, Endpoints, EntityType, PartitionFilter,
    Program, SystemClock, TokenManager,
};

use crate::config::Config;

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum EntityArg {
    Students,
    Institutes,
    All,
}

impl EntityArg {
    pub fn entities(self) -> Vec<EntityType> {
        match self {
            Self::Students => vec![EntityType::Student],
            Self::Institutes => vec![EntityType::Institute],
            Self::All => EntityType::ALL.to_vec(),
        }
    }
}

/// Partition selection shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct PartitionArgs {
    /// Programs to include (comma-separated, e.g. ITI,Diploma)
    #[arg(short, long, value_delimiter = ',')]
    pub program: Vec<String>,

    /// Academic years to include (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub year: Vec<u16>,

    /// Admission variant for Diploma institutes (fresh or lateral)
    #[arg(long)]
    pub variant: Option<String>,
}

impl PartitionArgs {
    /// Filter for one entity type.
    ///
    /// Programs not configured for `entity` are dropped, so `--program HSS`
    /// with `all` only touches students. Returns `None` when every requested
    /// program was dropped.
    pub fn filter(&self, catalog: &Catalog, entity: EntityType) -> Result<Option<PartitionFilter>> {
        let mut programs = Vec::with_capacity(self.program.len());
        for name in &self.program {
            programs.push(Program::from_name(name)?);
        }
        let requested = programs.len();
        programs.retain(|&p| catalog.range(entity, p).is_some());
        if requested > 0 && programs.is_empty() {
            return Ok(None);
        }
        let variant = self
            .variant
            .as_deref()
            .map(AdmissionVariant::from_name)
            .transpose()?;
        Ok(Some(PartitionFilter {
            programs,
            years: self.year.clone(),
            variant,
        }))
    }
}

/// Token manager and API client over the shared HTTP client
pub fn connect(config: &Config) -> Result<(ApiClient, Arc<TokenManager>)> {
    let credentials = config.credentials()?;
    let endpoints = Endpoints::new(&config.api.base_url);
    let transport = Arc::new(HttpTransport::new(config.api.timeout()));
    let tokens = Arc::new(
        TokenManager::new(endpoints.auth(), credentials, transport.clone(), Arc::new(SystemClock))
            .with_ttl(config.api.token_ttl()),
    );
    let client = ApiClient::new(endpoints, transport, tokens.clone());
    Ok((client, tokens))
}

pub fn open_store(config: &Config, db: Option<&Path>, connections: usize) -> Result<DuckStore> {
    let path = db.unwrap_or(&config.store.path);
    DuckStore::open(path, connections)
        .with_context(|| format!("Failed to open record store {}", path.display()))
}

/// Table with the house style and a cyan header row
pub fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use sams_etl::ProgramRanges;

    fn catalog() -> Catalog {
        ProgramRanges::default().catalog(false).unwrap()
    }

    #[test]
    fn empty_args_select_everything() {
        let filter = PartitionArgs::default()
            .filter(&catalog(), EntityType::Student)
            .unwrap()
            .unwrap();
        assert!(filter.programs.is_empty());
        assert!(filter.years.is_empty());
        assert!(filter.variant.is_none());
    }

    #[test]
    fn student_only_program_skips_institutes() {
        let args = PartitionArgs {
            program: vec!["hss".into()],
            ..Default::default()
        };
        let students = args.filter(&catalog(), EntityType::Student).unwrap().unwrap();
        assert_eq!(students.programs, vec![Program::Hss]);
        assert!(args.filter(&catalog(), EntityType::Institute).unwrap().is_none());
    }

    #[test]
    fn bad_names_rejected() {
        let args = PartitionArgs {
            program: vec!["MBA".into()],
            ..Default::default()
        };
        assert!(args.filter(&catalog(), EntityType::Student).is_err());

        let args = PartitionArgs {
            variant: Some("sideways".into()),
            ..Default::default()
        };
        assert!(args.filter(&catalog(), EntityType::Institute).is_err());
    }

    #[test]
    fn variant_parsed() {
        let args = PartitionArgs {
            program: vec!["Diploma".into()],
            variant: Some("lateral".into()),
            ..Default::default()
        };
        let filter = args.filter(&catalog(), EntityType::Institute).unwrap().unwrap();
        assert_eq!(filter.variant, Some(AdmissionVariant::Lateral));
    }
}
