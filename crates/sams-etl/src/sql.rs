//! SQL text for the DuckDB store.
//!
//! Table layouts are generated from the column lists in [`crate::record`], so
//! the mapped row and the insert statement can never disagree on order.

use crate::partition::EntityType;
use crate::record::{ColumnKind, columns};

pub const CHECKPOINT_TABLE: &str = "sync_checkpoints";

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text | ColumnKind::Json => "VARCHAR",
        ColumnKind::Integer => "INTEGER",
    }
}

/// Sequence, table and uniqueness constraint for one entity
pub fn create_table(entity: EntityType) -> String {
    let table = entity.table();
    let mut defs = vec![format!(
        "id BIGINT DEFAULT nextval('{table}_id_seq') PRIMARY KEY"
    )];
    for column in columns(entity) {
        let null = if column.key { " NOT NULL" } else { "" };
        defs.push(format!("{} {}{null}", column.name, sql_type(column.kind)));
    }
    defs.push("raw_json VARCHAR NOT NULL".to_string());
    defs.push("loaded_at TIMESTAMP DEFAULT current_timestamp".to_string());

    let key: Vec<&str> = columns(entity)
        .iter()
        .filter(|c| c.key)
        .map(|c| c.name)
        .collect();
    defs.push(format!("UNIQUE ({})", key.join(", ")));

    format!(
        "CREATE SEQUENCE IF NOT EXISTS {table}_id_seq;\n\
         CREATE TABLE IF NOT EXISTS {table} (\n    {}\n);",
        defs.join(",\n    ")
    )
}

pub fn create_checkpoint_table() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {CHECKPOINT_TABLE} (
    entity VARCHAR NOT NULL,
    module VARCHAR NOT NULL,
    academic_year INTEGER NOT NULL,
    admission_type INTEGER NOT NULL,
    outcome VARCHAR NOT NULL,
    expected_count BIGINT,
    retrieved BIGINT NOT NULL,
    inserted BIGINT NOT NULL,
    duplicates BIGINT NOT NULL,
    rejected BIGINT NOT NULL,
    failed BIGINT NOT NULL,
    completed_at VARCHAR NOT NULL,
    PRIMARY KEY (entity, module, academic_year, admission_type)
);"
    )
}

/// Every table, in creation order
pub fn create_schema() -> String {
    let mut stmts: Vec<String> = EntityType::ALL.iter().map(|e| create_table(*e)).collect();
    stmts.push(create_checkpoint_table());
    stmts.join("\n")
}

/// Parameterised insert; placeholders follow the column list then `raw_json`
pub fn insert_row(entity: EntityType) -> String {
    let mut names: Vec<&str> = columns(entity).iter().map(|c| c.name).collect();
    names.push("raw_json");
    let placeholders = vec!["?"; names.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        entity.table(),
        names.join(", ")
    )
}

/// `WHERE` clause selecting one partition; binds module, year and (institutes) admission type
fn partition_predicate(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Student => "module = ? AND academic_year = ?",
        EntityType::Institute => "module = ? AND academic_year = ? AND admission_type = ?",
    }
}

pub fn count_partition(entity: EntityType) -> String {
    format!(
        "SELECT count(*) FROM {} WHERE {}",
        entity.table(),
        partition_predicate(entity)
    )
}

pub fn delete_partition(entity: EntityType) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        entity.table(),
        partition_predicate(entity)
    )
}

/// Row counts grouped by partition: module, academic_year, admission_type, count
pub fn partition_counts(entity: EntityType) -> String {
    let table = entity.table();
    match entity {
        EntityType::Student => format!(
            "SELECT module, academic_year, 0 AS admission_type, count(*) \
             FROM {table} GROUP BY module, academic_year ORDER BY module, academic_year"
        ),
        EntityType::Institute => format!(
            "SELECT module, academic_year, admission_type, count(*) \
             FROM {table} GROUP BY module, academic_year, admission_type \
             ORDER BY module, academic_year, admission_type"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_table_has_full_unique_key() {
        let ddl = create_table(EntityType::Student);
        assert!(ddl.contains("CREATE SEQUENCE IF NOT EXISTS students_id_seq"));
        assert!(ddl.contains(
            "UNIQUE (barcode, module, academic_year, applied_status, enrollment_status, \
             admission_status, phase, year)"
        ));
        assert!(ddl.contains("phase VARCHAR NOT NULL"));
        assert!(ddl.contains("student_name VARCHAR,"));
    }

    #[test]
    fn institute_key_includes_admission_type() {
        let ddl = create_table(EntityType::Institute);
        assert!(ddl.contains("UNIQUE (sams_code, academic_year, module, admission_type)"));
        assert!(ddl.contains("admission_type INTEGER NOT NULL"));
    }

    #[test]
    fn insert_placeholder_count() {
        let sql = insert_row(EntityType::Institute);
        let placeholders = sql.matches('?').count();
        assert_eq!(placeholders, columns(EntityType::Institute).len() + 1);
        assert!(sql.ends_with("?)"));
    }

    #[test]
    fn predicates_per_entity() {
        assert_eq!(count_partition(EntityType::Student).matches('?').count(), 2);
        assert_eq!(delete_partition(EntityType::Institute).matches('?').count(), 3);
    }
}
