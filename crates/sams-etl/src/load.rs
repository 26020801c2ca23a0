//! Idempotent loading of a partition's records.
//!
//! Duplicates are skipped, records missing a key field are rejected before
//! any write, lock contention is retried, and nothing short of the partition
//! ending aborts the batch.

use sams_core::{RetryPolicy, retry_with_backoff};
use serde_json::Value;

use crate::error::StorageError;
use crate::partition::PartitionKey;
use crate::record::{Row, map_record};

/// Where mapped rows are written
pub trait RowSink: Send + Sync {
    /// Single row, atomically
    fn insert(&self, row: &Row) -> Result<(), StorageError>;

    /// Every row or none
    fn insert_all(&self, rows: &[Row]) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// Already stored; skipped
    Duplicate,
    /// Missing a uniqueness-key field; never written
    Rejected,
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl LoadReport {
    pub fn tally(outcomes: &[RecordOutcome]) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                RecordOutcome::Inserted => report.inserted += 1,
                RecordOutcome::Duplicate => report.duplicates += 1,
                RecordOutcome::Rejected => report.rejected += 1,
                RecordOutcome::Failed => report.failed += 1,
            }
        }
        report
    }

    pub fn total(&self) -> u64 {
        self.inserted + self.duplicates + self.rejected + self.failed
    }

    pub fn merge(&mut self, other: &LoadReport) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

pub struct Loader<'a> {
    sink: &'a dyn RowSink,
    /// Per-record contention retry
    lock_policy: RetryPolicy,
    /// Whole-batch retry in bulk mode
    batch_policy: RetryPolicy,
}

impl<'a> Loader<'a> {
    pub fn new(sink: &'a dyn RowSink, lock_policy: RetryPolicy, batch_policy: RetryPolicy) -> Self {
        Self {
            sink,
            lock_policy,
            batch_policy,
        }
    }

    /// Insert records one at a time; one outcome per input record
    pub fn load(&self, partition: &PartitionKey, records: &[Value]) -> Vec<RecordOutcome> {
        records
            .iter()
            .map(|record| match self.map(partition, record) {
                Some(row) => self.insert_one(partition, &row),
                None => RecordOutcome::Rejected,
            })
            .collect()
    }

    /// Insert the whole partition in one transaction.
    ///
    /// Contention retries the batch. A duplicate anywhere in the batch rolls
    /// it back and falls back to per-record inserts so the new rows still land.
    pub fn load_bulk(&self, partition: &PartitionKey, records: &[Value]) -> Vec<RecordOutcome> {
        let mapped: Vec<Option<Row>> = records.iter().map(|r| self.map(partition, r)).collect();
        let rows: Vec<Row> = mapped.iter().flatten().cloned().collect();
        if rows.is_empty() {
            return vec![RecordOutcome::Rejected; records.len()];
        }

        let label = format!("{partition} bulk insert");
        let result = retry_with_backoff(&label, &self.batch_policy, StorageError::is_contention, |_| {
            self.sink.insert_all(&rows)
        });

        let row_outcome = match result {
            Ok(()) => {
                log::debug!("{partition}: bulk inserted {} rows", rows.len());
                RecordOutcome::Inserted
            }
            Err(StorageError::Constraint(e)) => {
                log::warn!("{partition}: bulk insert hit existing rows ({e}), loading per record");
                return mapped
                    .iter()
                    .map(|row| match row {
                        Some(row) => self.insert_one(partition, row),
                        None => RecordOutcome::Rejected,
                    })
                    .collect();
            }
            Err(e) => {
                log::error!("{partition}: bulk insert of {} rows failed: {e}", rows.len());
                RecordOutcome::Failed
            }
        };

        mapped
            .iter()
            .map(|row| if row.is_some() { row_outcome } else { RecordOutcome::Rejected })
            .collect()
    }

    fn map(&self, partition: &PartitionKey, record: &Value) -> Option<Row> {
        match map_record(partition, record) {
            Ok(row) => Some(row),
            Err(missing) => {
                log::warn!(
                    "{partition}: rejected record {}: missing key field(s) {}",
                    missing.natural_id,
                    missing.fields.join(", ")
                );
                None
            }
        }
    }

    fn insert_one(&self, partition: &PartitionKey, row: &Row) -> RecordOutcome {
        let label = format!("{partition} insert {}", row.natural_id);
        let result = retry_with_backoff(&label, &self.lock_policy, StorageError::is_contention, |_| {
            self.sink.insert(row)
        });
        match result {
            Ok(()) => RecordOutcome::Inserted,
            Err(StorageError::Constraint(_)) => {
                log::warn!("{partition}: duplicate record {}, skipped", row.natural_id);
                RecordOutcome::Duplicate
            }
            Err(e) => {
                log::error!("{partition}: failed to insert record {}: {e}", row.natural_id);
                RecordOutcome::Failed
            }
        }
    }
}
