//! Durable record of completed partitions.
//!
//! A partition is checkpointed once it has been fully downloaded and loaded
//! (possibly with skipped or failed records). Reruns exclude checkpointed
//! partitions without calling the API.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Context, Result};
use duckdb::params;

use crate::load::LoadReport;
use crate::partition::{EntityType, PartitionKey};
use crate::sql::CHECKPOINT_TABLE;
use crate::store::{DuckStore, partition_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Loaded,
    /// Upstream had no records for the partition
    Empty,
}

impl CompletionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Empty => "empty",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "empty" { Self::Empty } else { Self::Loaded }
    }
}

impl fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub key: PartitionKey,
    pub kind: CompletionKind,
    pub expected: Option<u64>,
    pub retrieved: u64,
    pub report: LoadReport,
    /// RFC 3339
    pub completed_at: String,
}

impl Checkpoint {
    pub fn new(key: PartitionKey, kind: CompletionKind, expected: Option<u64>, retrieved: u64, report: LoadReport) -> Self {
        Self {
            key,
            kind,
            expected,
            retrieved,
            report,
            completed_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}

/// Checkpoint table in the record store
pub struct CheckpointStore<'a> {
    store: &'a DuckStore,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(store: &'a DuckStore) -> Self {
        Self { store }
    }

    pub fn is_complete(&self, key: &PartitionKey) -> Result<bool> {
        self.store.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    &format!(
                        "SELECT count(*) FROM {CHECKPOINT_TABLE} \
                         WHERE entity = ? AND module = ? AND academic_year = ? AND admission_type = ?"
                    ),
                    params![
                        key.entity.table(),
                        key.program.api_name(),
                        i32::from(key.period),
                        key.admission_code()
                    ],
                    |row| row.get(0),
                )
                .with_context(|| format!("Failed to read checkpoint for {key}"))?;
            Ok(n > 0)
        })
    }

    /// Record (or overwrite) a partition's completion
    pub fn mark_complete(&self, checkpoint: &Checkpoint) -> Result<()> {
        let key = &checkpoint.key;
        let report = &checkpoint.report;
        self.store.with_conn(|conn| {
            conn.execute(
                &format!("INSERT OR REPLACE INTO {CHECKPOINT_TABLE} VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
                params![
                    key.entity.table(),
                    key.program.api_name(),
                    i32::from(key.period),
                    key.admission_code(),
                    checkpoint.kind.as_str(),
                    checkpoint.expected.map(|n| n as i64),
                    checkpoint.retrieved as i64,
                    report.inserted as i64,
                    report.duplicates as i64,
                    report.rejected as i64,
                    report.failed as i64,
                    checkpoint.completed_at,
                ],
            )
            .with_context(|| format!("Failed to write checkpoint for {key}"))?;
            Ok(())
        })
    }

    /// Every checkpointed partition of an entity type
    pub fn list(&self, entity: EntityType) -> Result<Vec<Checkpoint>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT module, academic_year, admission_type, outcome, expected_count, retrieved, \
                 inserted, duplicates, rejected, failed, completed_at \
                 FROM {CHECKPOINT_TABLE} WHERE entity = ? \
                 ORDER BY module, academic_year, admission_type"
            ))?;
            let rows = stmt.query_map([entity.table()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    [
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, i64>(9)?,
                    ],
                    row.get::<_, String>(10)?,
                ))
            })?;

            let mut checkpoints = Vec::new();
            for row in rows {
                let (module, year, admission, outcome, expected, counts, completed_at) = row?;
                let Some(key) = partition_key(entity, &module, year, admission) else {
                    log::debug!("{entity}: ignoring checkpoint for {module}/{year}");
                    continue;
                };
                let [retrieved, inserted, duplicates, rejected, failed] = counts.map(|n| n as u64);
                checkpoints.push(Checkpoint {
                    key,
                    kind: CompletionKind::parse(&outcome),
                    expected: expected.map(|n| n as u64),
                    retrieved,
                    report: LoadReport {
                        inserted,
                        duplicates,
                        rejected,
                        failed,
                    },
                    completed_at,
                });
            }
            Ok(checkpoints)
        })
    }

    pub fn completed(&self, entity: EntityType) -> Result<BTreeSet<PartitionKey>> {
        Ok(self.list(entity)?.into_iter().map(|c| c.key).collect())
    }

    /// Forget a partition; returns whether a checkpoint existed
    pub fn clear(&self, key: &PartitionKey) -> Result<bool> {
        self.store.with_conn(|conn| {
            let n = conn
                .execute(
                    &format!(
                        "DELETE FROM {CHECKPOINT_TABLE} \
                         WHERE entity = ? AND module = ? AND academic_year = ? AND admission_type = ?"
                    ),
                    params![
                        key.entity.table(),
                        key.program.api_name(),
                        i32::from(key.period),
                        key.admission_code()
                    ],
                )
                .with_context(|| format!("Failed to clear checkpoint for {key}"))?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{AdmissionVariant, Program};

    fn report(inserted: u64) -> LoadReport {
        LoadReport {
            inserted,
            duplicates: 1,
            ..Default::default()
        }
    }

    #[test]
    fn mark_and_query() {
        let store = DuckStore::open_in_memory(1).unwrap();
        let checkpoints = CheckpointStore::new(&store);
        let key = PartitionKey::new(EntityType::Student, Program::Iti, 2022);

        assert!(!checkpoints.is_complete(&key).unwrap());
        checkpoints
            .mark_complete(&Checkpoint::new(key, CompletionKind::Loaded, Some(10), 9, report(8)))
            .unwrap();
        assert!(checkpoints.is_complete(&key).unwrap());

        let listed = checkpoints.list(EntityType::Student).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, key);
        assert_eq!(listed[0].expected, Some(10));
        assert_eq!(listed[0].retrieved, 9);
        assert_eq!(listed[0].report, report(8));
        assert!(checkpoints.list(EntityType::Institute).unwrap().is_empty());
    }

    #[test]
    fn remark_overwrites() {
        let store = DuckStore::open_in_memory(1).unwrap();
        let checkpoints = CheckpointStore::new(&store);
        let key = PartitionKey::new(EntityType::Student, Program::Pdis, 2021);
        checkpoints
            .mark_complete(&Checkpoint::new(key, CompletionKind::Empty, Some(0), 0, LoadReport::default()))
            .unwrap();
        checkpoints
            .mark_complete(&Checkpoint::new(key, CompletionKind::Loaded, None, 5, report(5)))
            .unwrap();
        let listed = checkpoints.list(EntityType::Student).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, CompletionKind::Loaded);
        assert_eq!(listed[0].expected, None);
    }

    #[test]
    fn variants_tracked_separately() {
        let store = DuckStore::open_in_memory(1).unwrap();
        let checkpoints = CheckpointStore::new(&store);
        let fresh = PartitionKey::new(EntityType::Institute, Program::Diploma, 2023)
            .with_variant(AdmissionVariant::Fresh);
        let lateral = fresh.with_variant(AdmissionVariant::Lateral);
        checkpoints
            .mark_complete(&Checkpoint::new(fresh, CompletionKind::Loaded, None, 1, report(1)))
            .unwrap();
        assert!(checkpoints.is_complete(&fresh).unwrap());
        assert!(!checkpoints.is_complete(&lateral).unwrap());
        assert_eq!(
            checkpoints.completed(EntityType::Institute).unwrap(),
            BTreeSet::from([fresh])
        );
    }

    #[test]
    fn clear_removes() {
        let store = DuckStore::open_in_memory(1).unwrap();
        let checkpoints = CheckpointStore::new(&store);
        let key = PartitionKey::new(EntityType::Student, Program::Hss, 2019);
        checkpoints
            .mark_complete(&Checkpoint::new(key, CompletionKind::Loaded, None, 1, report(1)))
            .unwrap();
        assert!(checkpoints.clear(&key).unwrap());
        assert!(!checkpoints.clear(&key).unwrap());
        assert!(!checkpoints.is_complete(&key).unwrap());
    }
}
