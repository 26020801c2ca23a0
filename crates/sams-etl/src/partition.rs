//! Partition model and enumeration.
//!
//! A partition is one `(entity, program, academic year[, admission variant])`
//! slice of the upstream data. It is the unit of download, checkpointing and
//! reset. All year/program normalisation happens in [`Catalog`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PartitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Student,
    Institute,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::Student, EntityType::Institute];

    pub fn from_name(name: &str) -> Result<Self, PartitionError> {
        match name.to_ascii_lowercase().as_str() {
            "student" | "students" => Ok(Self::Student),
            "institute" | "institutes" => Ok(Self::Institute),
            _ => Err(PartitionError::UnknownEntity(name.to_string())),
        }
    }

    /// Target table, also used as the entity label in logs
    pub fn table(self) -> &'static str {
        match self {
            Self::Student => "students",
            Self::Institute => "institutes",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Program {
    Iti,
    Diploma,
    Pdis,
    Hss,
    Deg,
}

impl Program {
    pub const ALL: [Program; 5] = [
        Program::Iti,
        Program::Diploma,
        Program::Pdis,
        Program::Hss,
        Program::Deg,
    ];

    /// Case-insensitive; returns the canonical program
    pub fn from_name(name: &str) -> Result<Self, PartitionError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "ITI" => Ok(Self::Iti),
            "DIPLOMA" => Ok(Self::Diploma),
            "PDIS" => Ok(Self::Pdis),
            "HSS" => Ok(Self::Hss),
            "DEG" => Ok(Self::Deg),
            _ => Err(PartitionError::UnknownProgram(name.to_string())),
        }
    }

    /// `Module` value on the wire
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Iti => "ITI",
            Self::Diploma => "Diploma",
            Self::Pdis => "PDIS",
            Self::Hss => "HSS",
            Self::Deg => "DEG",
        }
    }

    /// Student data is paged except for PDIS; institute data never is.
    pub fn paginates(self, entity: EntityType) -> bool {
        entity == EntityType::Student && self != Self::Pdis
    }

    pub fn admission_variants(self, entity: EntityType) -> &'static [AdmissionVariant] {
        if entity == EntityType::Institute && self == Self::Diploma {
            &AdmissionVariant::ALL
        } else {
            &[]
        }
    }

    /// Snake-cased key holding this program's option list in student records
    pub fn option_details_key(self) -> &'static str {
        match self {
            Self::Iti => "iti_option_details",
            Self::Diploma => "diploma_option_details",
            Self::Pdis => "pdis_option_details",
            Self::Hss => "hss_option_details",
            Self::Deg => "deg_option_details",
        }
    }

    pub fn compartments_key(self) -> &'static str {
        match self {
            Self::Iti => "iti_compartments",
            Self::Diploma => "diploma_compartments",
            Self::Pdis => "pdis_compartments",
            Self::Hss => "hss_compartments",
            Self::Deg => "deg_compartments",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Diploma institute admission type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdmissionVariant {
    Fresh,
    Lateral,
}

impl AdmissionVariant {
    pub const ALL: [AdmissionVariant; 2] = [AdmissionVariant::Fresh, AdmissionVariant::Lateral];

    /// `AdmissionType` value on the wire
    pub fn code(self) -> i32 {
        match self {
            Self::Fresh => 1,
            Self::Lateral => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Fresh),
            2 => Some(Self::Lateral),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, PartitionError> {
        match name.to_ascii_lowercase().as_str() {
            "fresh" | "1" => Ok(Self::Fresh),
            "lateral" | "2" => Ok(Self::Lateral),
            _ => Err(PartitionError::UnknownVariant(name.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Lateral => "lateral",
        }
    }
}

/// Inclusive academic-year bounds for one program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub min_year: u16,
    pub max_year: u16,
}

impl YearRange {
    pub const fn new(min_year: u16, max_year: u16) -> Self {
        Self { min_year, max_year }
    }

    pub fn contains(&self, year: u16) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = u16> {
        self.min_year..=self.max_year
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub entity: EntityType,
    pub program: Program,
    pub period: u16,
    pub variant: Option<AdmissionVariant>,
}

impl PartitionKey {
    pub fn new(entity: EntityType, program: Program, period: u16) -> Self {
        Self {
            entity,
            program,
            period,
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: AdmissionVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    /// Variant code as stored; 0 when the partition has no variant
    pub fn admission_code(&self) -> i32 {
        self.variant.map_or(0, AdmissionVariant::code)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity, self.program, self.period)?;
        if let Some(v) = self.variant {
            write!(f, "/{}", v.name())?;
        }
        Ok(())
    }
}

/// Restricts a run to part of the partition space. Empty lists mean "all".
#[derive(Debug, Clone, Default)]
pub struct PartitionFilter {
    pub programs: Vec<Program>,
    pub years: Vec<u16>,
    pub variant: Option<AdmissionVariant>,
}

/// Configured programs and their year ranges, per entity type
#[derive(Debug, Clone)]
pub struct Catalog {
    ranges: BTreeMap<(EntityType, Program), YearRange>,
    clamp_years: bool,
}

impl Catalog {
    pub fn new(clamp_years: bool) -> Self {
        Self {
            ranges: BTreeMap::new(),
            clamp_years,
        }
    }

    /// Register a program from its configured name
    pub fn insert(
        &mut self,
        entity: EntityType,
        program: &str,
        range: YearRange,
    ) -> Result<Program, PartitionError> {
        let parsed = Program::from_name(program)?;
        if range.min_year > range.max_year {
            return Err(PartitionError::InvalidRange {
                program: program.to_string(),
                min: range.min_year,
                max: range.max_year,
            });
        }
        self.ranges.insert((entity, parsed), range);
        Ok(parsed)
    }

    pub fn range(&self, entity: EntityType, program: Program) -> Option<YearRange> {
        self.ranges.get(&(entity, program)).copied()
    }

    pub fn programs(&self, entity: EntityType) -> impl Iterator<Item = Program> + '_ {
        self.ranges
            .keys()
            .filter(move |(e, _)| *e == entity)
            .map(|(_, p)| *p)
    }

    /// Validate a requested year against the program's range.
    ///
    /// Out-of-range years are rejected unless clamping is enabled, in which
    /// case they move to the nearest bound with a warning.
    pub fn normalize_year(
        &self,
        entity: EntityType,
        program: Program,
        year: u16,
    ) -> Result<u16, PartitionError> {
        let range = self
            .range(entity, program)
            .ok_or(PartitionError::NotConfigured {
                entity: entity.table(),
                program: program.api_name(),
            })?;
        if range.contains(year) {
            return Ok(year);
        }
        if !self.clamp_years {
            return Err(PartitionError::YearOutOfRange {
                program: program.api_name(),
                year,
                min: range.min_year,
                max: range.max_year,
            });
        }
        let clamped = year.clamp(range.min_year, range.max_year);
        log::warn!("{entity}/{program}: academic year {year} clamped to {clamped}");
        Ok(clamped)
    }

    /// Every partition of `entity` selected by `filter`, in a stable order.
    ///
    /// Programs named explicitly in the filter must exist and every requested
    /// year must normalise for them. When the filter names no programs, a
    /// requested year outside one program's range just excludes that program.
    pub fn enumerate(
        &self,
        entity: EntityType,
        filter: &PartitionFilter,
    ) -> Result<Vec<PartitionKey>, PartitionError> {
        let explicit = !filter.programs.is_empty();
        let programs: Vec<Program> = if explicit {
            filter.programs.clone()
        } else {
            self.programs(entity).collect()
        };

        let mut keys = BTreeSet::new();
        for program in programs {
            let Some(range) = self.range(entity, program) else {
                return Err(PartitionError::NotConfigured {
                    entity: entity.table(),
                    program: program.api_name(),
                });
            };

            let years: Vec<u16> = if filter.years.is_empty() {
                range.years().collect()
            } else {
                let mut years = Vec::new();
                for &year in &filter.years {
                    match self.normalize_year(entity, program, year) {
                        Ok(y) => years.push(y),
                        Err(e) if explicit => return Err(e),
                        Err(e) => log::debug!("{entity}/{program}: skipped, {e}"),
                    }
                }
                years
            };

            for period in years {
                let base = PartitionKey::new(entity, program, period);
                let variants = program.admission_variants(entity);
                if variants.is_empty() {
                    keys.insert(base);
                    continue;
                }
                for &variant in variants {
                    if filter.variant.is_none() || filter.variant == Some(variant) {
                        keys.insert(base.with_variant(variant));
                    }
                }
            }
        }
        Ok(keys.into_iter().collect())
    }
}
