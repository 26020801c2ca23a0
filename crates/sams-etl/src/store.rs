//! DuckDB-backed record store.
//!
//! One database, a pool of cloned connections (one per worker). Every
//! operation checks a connection out for its own duration only.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use duckdb::types::Value as SqlValue;
use duckdb::{Connection, params_from_iter};
use sams_core::Pool;

use crate::error::StorageError;
use crate::load::RowSink;
use crate::partition::{AdmissionVariant, EntityType, PartitionKey, Program};
use crate::record::{Cell, Row};
use crate::sql;

pub struct DuckStore {
    pool: Pool<Connection>,
    location: String,
    student_insert: String,
    institute_insert: String,
}

impl DuckStore {
    /// Open (or create) the database file and its tables
    pub fn open(path: &Path, connections: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB database {}", path.display()))?;
        Self::from_connection(conn, connections, path.display().to_string())
    }

    pub fn open_in_memory(connections: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory DuckDB")?;
        Self::from_connection(conn, connections, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, connections: usize, location: String) -> Result<Self> {
        conn.execute_batch(&sql::create_schema())
            .context("Failed to create tables")?;

        let mut conns = Vec::with_capacity(connections.max(1));
        for _ in 1..connections.max(1) {
            conns.push(conn.try_clone().context("Failed to clone DuckDB connection")?);
        }
        conns.push(conn);
        log::debug!("Opened {location} with {} connections", conns.len());

        Ok(Self {
            pool: Pool::new(conns),
            location,
            student_insert: sql::insert_row(EntityType::Student),
            institute_insert: sql::insert_row(EntityType::Institute),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn connections(&self) -> usize {
        self.pool.size()
    }

    /// Run `f` on a checked-out connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> T) -> T {
        let mut conn = self.pool.checkout();
        f(&mut conn)
    }

    fn insert_sql(&self, entity: EntityType) -> &str {
        match entity {
            EntityType::Student => &self.student_insert,
            EntityType::Institute => &self.institute_insert,
        }
    }

    /// Rows stored for one partition
    pub fn partition_rows(&self, key: &PartitionKey) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    &sql::count_partition(key.entity),
                    params_from_iter(partition_params(key)),
                    |row| row.get(0),
                )
                .with_context(|| format!("Failed to count rows for {key}"))?;
            Ok(n as u64)
        })
    }

    /// Row counts for every partition present in the entity's table
    pub fn partition_counts(&self, entity: EntityType) -> Result<BTreeMap<PartitionKey, u64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql::partition_counts(entity))?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut counts = BTreeMap::new();
            for row in rows {
                let (module, year, admission, n) = row?;
                match partition_key(entity, &module, year, admission) {
                    Some(key) => {
                        counts.insert(key, n as u64);
                    }
                    None => log::debug!("{entity}: ignoring rows for {module}/{year}"),
                }
            }
            Ok(counts)
        })
    }

    /// Delete every row of a partition; returns rows removed
    pub fn delete_partition(&self, key: &PartitionKey) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                &sql::delete_partition(key.entity),
                params_from_iter(partition_params(key)),
            )
            .with_context(|| format!("Failed to delete rows for {key}"))
        })
    }
}

impl RowSink for DuckStore {
    fn insert(&self, row: &Row) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(self.insert_sql(row.entity))?;
            stmt.execute(params_from_iter(row.cells.iter().map(sql_value)))?;
            Ok(())
        })
    }

    /// All-or-nothing: one transaction for the whole batch
    fn insert_all(&self, rows: &[Row]) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for row in rows {
                let mut stmt = tx.prepare_cached(self.insert_sql(row.entity))?;
                stmt.execute(params_from_iter(row.cells.iter().map(sql_value)))?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn sql_value(cell: &Cell) -> SqlValue {
    match cell {
        Cell::Null => SqlValue::Null,
        Cell::Text(s) => SqlValue::Text(s.clone()),
        Cell::Int(n) => SqlValue::BigInt(*n),
    }
}

/// Bind values for [`sql::count_partition`] / [`sql::delete_partition`]
pub(crate) fn partition_params(key: &PartitionKey) -> Vec<SqlValue> {
    let mut params = vec![
        SqlValue::Text(key.program.api_name().to_string()),
        SqlValue::Int(i32::from(key.period)),
    ];
    if key.entity == EntityType::Institute {
        params.push(SqlValue::Int(key.admission_code()));
    }
    params
}

/// Rebuild a key from stored columns; `None` for values outside the catalog's vocabulary
pub(crate) fn partition_key(entity: EntityType, module: &str, year: i64, admission: i64) -> Option<PartitionKey> {
    let program = Program::from_name(module).ok()?;
    let period = u16::try_from(year).ok()?;
    let key = PartitionKey::new(entity, program, period);
    if admission == 0 {
        return Some(key);
    }
    AdmissionVariant::from_code(admission).map(|v| key.with_variant(v))
}
