//! Expected-count sidecar.
//!
//! One CSV per entity type (`students_count.csv`, `institutes_count.csv`)
//! holding the total each partition reported upstream. It only feeds
//! shortfall reporting and `status`; nothing is gated on it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use sams_core::{RetryPolicy, retry_with_backoff};
use serde::{Deserialize, Serialize};

use crate::api::PageSource;
use crate::error::ApiError;
use crate::partition::{AdmissionVariant, EntityType, PartitionKey, Program};

#[derive(Debug, Serialize, Deserialize)]
struct CountRow {
    program: String,
    period: u16,
    admission_type: Option<i32>,
    expected_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedCounts {
    counts: BTreeMap<PartitionKey, u64>,
}

impl ExpectedCounts {
    pub fn path(state_dir: &Path, entity: EntityType) -> PathBuf {
        state_dir.join(format!("{}_count.csv", entity.table()))
    }

    /// Read a sidecar; a missing file is an empty set
    pub fn load(path: &Path, entity: EntityType) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut counts = BTreeMap::new();
        for row in reader.deserialize::<CountRow>() {
            let row = row.with_context(|| format!("Bad row in {}", path.display()))?;
            let Ok(program) = Program::from_name(&row.program) else {
                log::debug!("{}: skipping unknown program {}", path.display(), row.program);
                continue;
            };
            let mut key = PartitionKey::new(entity, program, row.period);
            if let Some(variant) = row.admission_type.and_then(|c| AdmissionVariant::from_code(c.into())) {
                key = key.with_variant(variant);
            }
            counts.insert(key, row.expected_count);
        }
        Ok(Self { counts })
    }

    /// Write via a temp file so readers never see a half-written sidecar
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            for (key, &expected_count) in &self.counts {
                writer.serialize(CountRow {
                    program: key.program.api_name().to_string(),
                    period: key.period,
                    admission_type: key.variant.map(AdmissionVariant::code),
                    expected_count,
                })?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
        Ok(())
    }

    /// Missing, unreadable, or older than `max_age`
    pub fn is_stale(path: &Path, max_age: Duration) -> bool {
        let modified = std::fs::metadata(path).and_then(|m| m.modified());
        match modified {
            Ok(t) => SystemTime::now()
                .duration_since(t)
                .map(|age| age > max_age)
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    pub fn get(&self, key: &PartitionKey) -> Option<u64> {
        self.counts.get(key).copied()
    }

    pub fn set(&mut self, key: PartitionKey, expected: u64) {
        self.counts.insert(key, expected);
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Ask upstream for every partition's total.
    ///
    /// Partitions whose count call keeps failing are left out and logged.
    /// An authentication failure stops the refresh.
    pub fn fetch(source: &dyn PageSource, partitions: &[PartitionKey], policy: &RetryPolicy) -> Result<Self, ApiError> {
        let mut counts = Self::default();
        for key in partitions {
            let label = format!("{key} count");
            match retry_with_backoff(&label, policy, ApiError::is_retryable, |_| source.fetch_count(key)) {
                Ok(n) => counts.set(*key, n),
                Err(e @ ApiError::Auth(_)) => return Err(e),
                Err(e) => log::warn!("{key}: expected count unavailable: {e}"),
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    struct FixedCounts;

    impl PageSource for FixedCounts {
        fn fetch_page(&self, _: &PartitionKey, _: Option<u32>) -> Result<Vec<Value>, ApiError> {
            Ok(Vec::new())
        }

        fn fetch_count(&self, key: &PartitionKey) -> Result<u64, ApiError> {
            if key.period == 2020 {
                Err(ApiError::ServerError)
            } else {
                Ok(u64::from(key.period) * 10 + key.admission_code() as u64)
            }
        }
    }

    #[test]
    fn round_trip_with_variants() {
        let dir = tempfile::tempdir().unwrap();
        let path = ExpectedCounts::path(dir.path(), EntityType::Institute);
        assert!(path.ends_with("institutes_count.csv"));

        let mut counts = ExpectedCounts::default();
        let iti = PartitionKey::new(EntityType::Institute, Program::Iti, 2022);
        let lateral = PartitionKey::new(EntityType::Institute, Program::Diploma, 2022)
            .with_variant(AdmissionVariant::Lateral);
        counts.set(iti, 40);
        counts.set(lateral, 12);
        counts.save(&path).unwrap();

        let loaded = ExpectedCounts::load(&path, EntityType::Institute).unwrap();
        assert_eq!(loaded, counts);
        assert_eq!(loaded.get(&lateral), Some(12));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("program,period,admission_type,expected_count"));
        assert!(text.contains("ITI,2022,,40"));
    }

    #[test]
    fn missing_file_is_empty_and_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students_count.csv");
        assert!(ExpectedCounts::load(&path, EntityType::Student).unwrap().is_empty());
        assert!(ExpectedCounts::is_stale(&path, Duration::from_secs(86_400)));
    }

    #[test]
    fn fresh_file_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students_count.csv");
        ExpectedCounts::default().save(&path).unwrap();
        assert!(!ExpectedCounts::is_stale(&path, Duration::from_secs(86_400)));
    }

    #[test]
    fn fetch_skips_failures() {
        let keys = [
            PartitionKey::new(EntityType::Student, Program::Iti, 2020),
            PartitionKey::new(EntityType::Student, Program::Iti, 2021),
        ];
        let counts = ExpectedCounts::fetch(&FixedCounts, &keys, &RetryPolicy::immediate(2)).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get(&keys[1]), Some(20210));
    }
}
