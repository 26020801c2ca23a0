//! Engine settings (the `[api]`, `[sync]` and `[programs]` config sections)

use std::collections::BTreeMap;
use std::time::Duration;

use sams_core::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::error::PartitionError;
use crate::partition::{Catalog, EntityType, YearRange};

pub const DEFAULT_BASE_URL: &str = "https://api.samsodisha.gov.in/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub timeout_secs: u64,
    pub token_ttl_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 120,
            token_ttl_secs: 1800,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Attempts per page (and per bulk batch)
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Attempts per record on lock contention
    pub lock_retries: u32,
    pub lock_backoff_ms: u64,
    pub workers: usize,
    pub bulk: bool,
    /// Sidecar age that triggers an expected-count refresh
    pub counts_max_age_hours: u64,
    pub clamp_years: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: sams_core::ERRMAX,
            backoff_ms: 1000,
            lock_retries: 3,
            lock_backoff_ms: 200,
            workers: 1,
            bulk: false,
            counts_max_age_hours: 24,
            clamp_years: false,
        }
    }
}

impl SyncSettings {
    pub fn page_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }

    pub fn lock_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.lock_retries, Duration::from_millis(self.lock_backoff_ms))
    }

    pub fn counts_max_age(&self) -> Duration {
        Duration::from_secs(self.counts_max_age_hours * 3600)
    }
}

/// Year ranges keyed by program name, one table per entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramRanges {
    pub student: BTreeMap<String, YearRange>,
    pub institute: BTreeMap<String, YearRange>,
}

impl Default for ProgramRanges {
    fn default() -> Self {
        let iti = YearRange::new(2017, 2024);
        let diploma = YearRange::new(2018, 2024);
        let pdis = YearRange::new(2020, 2024);
        let student = BTreeMap::from([
            ("ITI".to_string(), iti),
            ("Diploma".to_string(), diploma),
            ("PDIS".to_string(), pdis),
            ("HSS".to_string(), YearRange::new(2018, 2024)),
            ("DEG".to_string(), YearRange::new(2018, 2024)),
        ]);
        let institute = BTreeMap::from([
            ("ITI".to_string(), iti),
            ("Diploma".to_string(), diploma),
            ("PDIS".to_string(), pdis),
        ]);
        Self { student, institute }
    }
}

impl ProgramRanges {
    /// Parse program names and build the partition catalog
    pub fn catalog(&self, clamp_years: bool) -> Result<Catalog, PartitionError> {
        let mut catalog = Catalog::new(clamp_years);
        for (name, range) in &self.student {
            catalog.insert(EntityType::Student, name, *range)?;
        }
        for (name, range) in &self.institute {
            catalog.insert(EntityType::Institute, name, *range)?;
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{PartitionFilter, Program};

    #[test]
    fn default_catalog_ranges() {
        let catalog = ProgramRanges::default().catalog(false).unwrap();
        assert_eq!(
            catalog.range(EntityType::Student, Program::Pdis),
            Some(YearRange::new(2020, 2024))
        );
        assert_eq!(
            catalog.range(EntityType::Student, Program::Iti),
            Some(YearRange::new(2017, 2024))
        );
        assert_eq!(catalog.range(EntityType::Institute, Program::Hss), None);
        assert_eq!(catalog.programs(EntityType::Student).count(), 5);
    }

    #[test]
    fn default_institute_space() {
        let catalog = ProgramRanges::default().catalog(false).unwrap();
        let keys = catalog
            .enumerate(EntityType::Institute, &PartitionFilter::default())
            .unwrap();
        // ITI 8 + Diploma 7 x 2 variants + PDIS 5
        assert_eq!(keys.len(), 8 + 14 + 5);
    }

    #[test]
    fn unknown_program_name_rejected() {
        let mut ranges = ProgramRanges::default();
        ranges
            .student
            .insert("MBA".to_string(), YearRange::new(2020, 2021));
        assert!(ranges.catalog(false).is_err());
    }

    #[test]
    fn policies_from_settings() {
        let sync = SyncSettings::default();
        let page = sync.page_policy();
        assert_eq!(page.max_attempts, 3);
        assert_eq!(page.backoff(2), Duration::from_millis(2000));
        assert_eq!(sync.counts_max_age(), Duration::from_secs(86_400));
    }
}
