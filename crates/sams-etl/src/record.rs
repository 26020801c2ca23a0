//! Raw API record → table row.
//!
//! API keys are CamelCase with a few upstream misspellings; columns are
//! snake_case. Key columns are typed and required, descriptive columns are
//! optional text, nested structures are kept as JSON text, and the whole raw
//! record is stored alongside.

use serde_json::{Map, Value};

use crate::partition::{EntityType, PartitionKey, Program};

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    /// Nested array/object serialised as JSON text
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Part of the uniqueness key; must be present
    pub key: bool,
}

const fn key(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        key: true,
    }
}

const fn text(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Text,
        key: false,
    }
}

const fn json(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Json,
        key: false,
    }
}

pub const STUDENT_COLUMNS: &[Column] = &[
    key("barcode", ColumnKind::Text),
    key("module", ColumnKind::Text),
    key("academic_year", ColumnKind::Integer),
    key("applied_status", ColumnKind::Text),
    key("enrollment_status", ColumnKind::Text),
    key("admission_status", ColumnKind::Text),
    key("phase", ColumnKind::Text),
    key("year", ColumnKind::Text),
    text("student_name"),
    text("gender"),
    text("dob"),
    text("religion_name"),
    text("social_category"),
    text("district"),
    text("block"),
    text("highest_qualification"),
    text("percentage"),
    text("sams_code"),
    text("reported_institute"),
    text("reported_branch_or_trade"),
    text("institute_district"),
    text("type_of_institute"),
    text("date_of_application"),
    json("option_details"),
    json("subject_wise_marks"),
    json("compartments"),
];

pub const INSTITUTE_COLUMNS: &[Column] = &[
    key("sams_code", ColumnKind::Text),
    key("academic_year", ColumnKind::Integer),
    key("module", ColumnKind::Text),
    key("admission_type", ColumnKind::Integer),
    text("institute_name"),
    text("ncvtmis_code"),
    text("type_of_institute"),
    text("district"),
    text("block"),
    text("branch"),
    text("trade"),
    json("strength"),
    json("cutoff"),
    json("enrollment"),
];

pub fn columns(entity: EntityType) -> &'static [Column] {
    match entity {
        EntityType::Student => STUDENT_COLUMNS,
        EntityType::Institute => INSTITUTE_COLUMNS,
    }
}

/// Column holding the natural identifier used in log messages
pub fn natural_id_column(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Student => "barcode",
        EntityType::Institute => "sams_code",
    }
}

/// A cell value ready for binding
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
}

/// One row for `students` or `institutes`.
///
/// `cells` follows [`columns`] for the entity, followed by the raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub entity: EntityType,
    pub program: Program,
    pub natural_id: String,
    pub cells: Vec<Cell>,
}

/// The record lacks uniqueness-key fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingKey {
    pub natural_id: String,
    pub fields: Vec<&'static str>,
}

/// Null, blank or the literal "NA"
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty() || s.trim() == "NA",
        _ => false,
    }
}

/// CamelCase API key → snake_case column name
pub fn snake_case(key: &str) -> String {
    let all_upper =
        key.chars().any(char::is_alphabetic) && !key.chars().any(char::is_lowercase);
    let text = if all_upper {
        key.to_lowercase()
    } else {
        key.to_string()
    };
    let text = correct_spelling(&text);
    text.split('_')
        .map(split_words)
        .collect::<Vec<_>>()
        .join("_")
}

/// Upstream misspellings, fixed before the case split
fn correct_spelling(key: &str) -> String {
    if key == "TypeofInstitute" {
        return "type_of_institute".to_string();
    }
    key.replace("Tength", "Tenth")
        .replace("tength", "tenth")
        .replace("OR", "Or")
        .replace("cuttoff", "cutoff")
        .replace("Cuttoff", "Cutoff")
}

/// Insert `_` before an upper-case letter that starts a lower-case run
fn split_words(part: &str) -> String {
    let chars: Vec<char> = part.chars().collect();
    let mut out = String::with_capacity(part.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        let starts_word = i > 0
            && c.is_uppercase()
            && chars.get(i + 1).is_some_and(|n| n.is_lowercase());
        if starts_word {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Re-key a raw record with snake_case names
pub fn normalize_keys(record: &Map<String, Value>) -> Map<String, Value> {
    record
        .iter()
        .map(|(k, v)| (snake_case(k), v.clone()))
        .collect()
}

fn text_of(value: &Value) -> Option<String> {
    if is_missing(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn int_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Source key for a column; program-specific for the nested student fields
fn source_key(entity: EntityType, program: Program, column: &'static str) -> &'static str {
    match (entity, column) {
        (EntityType::Student, "option_details") => program.option_details_key(),
        (EntityType::Student, "compartments") => program.compartments_key(),
        _ => column,
    }
}

/// Build the row for a tagged record.
///
/// Fails without touching storage when any uniqueness-key field is missing.
/// Institutes without an admission variant store 0 so the key stays non-null.
pub fn map_record(partition: &PartitionKey, record: &Value) -> Result<Row, MissingKey> {
    let entity = partition.entity;
    let empty = Map::new();
    let raw = record.as_object().unwrap_or(&empty);
    let fields = normalize_keys(raw);

    let natural_id = fields
        .get(natural_id_column(entity))
        .and_then(text_of)
        .unwrap_or_else(|| "<unknown>".to_string());

    let mut cells = Vec::with_capacity(columns(entity).len() + 1);
    let mut missing = Vec::new();
    for column in columns(entity) {
        let value = fields.get(source_key(entity, partition.program, column.name));
        let cell = match (column.kind, value) {
            (ColumnKind::Integer, Some(v)) => int_of(v).map_or(Cell::Null, Cell::Int),
            (ColumnKind::Text, Some(v)) => text_of(v).map_or(Cell::Null, Cell::Text),
            (ColumnKind::Json, Some(v)) if !is_missing(v) => Cell::Text(v.to_string()),
            _ => Cell::Null,
        };
        let cell = match cell {
            Cell::Null if entity == EntityType::Institute && column.name == "admission_type" => {
                Cell::Int(0)
            }
            other => other,
        };
        if column.key && cell == Cell::Null {
            missing.push(column.name);
        }
        cells.push(cell);
    }

    if !missing.is_empty() {
        return Err(MissingKey {
            natural_id,
            fields: missing,
        });
    }

    cells.push(Cell::Text(record.to_string()));
    Ok(Row {
        entity,
        program: partition.program,
        natural_id,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::tag;
    use crate::partition::AdmissionVariant;
    use serde_json::json;

    #[test]
    fn snake_case_conversions() {
        assert_eq!(snake_case("Barcode"), "barcode");
        assert_eq!(snake_case("AppliedStatus"), "applied_status");
        assert_eq!(snake_case("SAMSCode"), "sams_code");
        assert_eq!(snake_case("DOB"), "dob");
        assert_eq!(snake_case("ITIOptionDetails"), "iti_option_details");
        assert_eq!(snake_case("academic_year"), "academic_year");
        assert_eq!(snake_case("NCVTMISCode"), "ncvtmis_code");
    }

    #[test]
    fn spelling_corrections() {
        assert_eq!(snake_case("TengthPercentage"), "tenth_percentage");
        assert_eq!(snake_case("ReportedBranchORTrade"), "reported_branch_or_trade");
        assert_eq!(snake_case("TypeofInstitute"), "type_of_institute");
        assert_eq!(snake_case("cuttoff"), "cutoff");
    }

    #[test]
    fn missing_values() {
        assert!(is_missing(&Value::Null));
        assert!(is_missing(&json!("")));
        assert!(is_missing(&json!(" ")));
        assert!(is_missing(&json!("NA")));
        assert!(!is_missing(&json!("N")));
        assert!(!is_missing(&json!(0)));
    }

    fn student(key: PartitionKey) -> Value {
        tag(
            json!({
                "Barcode": "B100",
                "AppliedStatus": "Applied",
                "EnrollmentStatus": "Enrolled",
                "AdmissionStatus": "Admitted",
                "Phase": 1,
                "Year": "1st",
                "StudentName": "A",
                "ITIOptionDetails": [{"Option": 1}],
                "SubjectWiseMarks": {"Math": 80},
                "ReportedBranchORTrade": "Fitter",
                "DOB": "NA"
            }),
            &key,
        )
    }

    fn cell<'a>(row: &'a Row, name: &str) -> &'a Cell {
        let idx = columns(row.entity)
            .iter()
            .position(|c| c.name == name)
            .unwrap();
        &row.cells[idx]
    }

    #[test]
    fn maps_student_row() {
        let key = PartitionKey::new(EntityType::Student, Program::Iti, 2022);
        let row = map_record(&key, &student(key)).unwrap();
        assert_eq!(row.natural_id, "B100");
        assert_eq!(row.cells.len(), STUDENT_COLUMNS.len() + 1);
        assert_eq!(cell(&row, "module"), &Cell::Text("ITI".into()));
        assert_eq!(cell(&row, "academic_year"), &Cell::Int(2022));
        assert_eq!(cell(&row, "phase"), &Cell::Text("1".into()));
        assert_eq!(cell(&row, "dob"), &Cell::Null);
        assert_eq!(
            cell(&row, "reported_branch_or_trade"),
            &Cell::Text("Fitter".into())
        );
        assert_eq!(
            cell(&row, "option_details"),
            &Cell::Text(r#"[{"Option":1}]"#.into())
        );
        assert!(matches!(row.cells.last(), Some(Cell::Text(raw)) if raw.contains("B100")));
    }

    #[test]
    fn option_details_are_program_specific() {
        // An ITI key on a Diploma partition is not the Diploma option list
        let key = PartitionKey::new(EntityType::Student, Program::Diploma, 2022);
        let row = map_record(&key, &student(key)).unwrap();
        assert_eq!(cell(&row, "option_details"), &Cell::Null);
    }

    #[test]
    fn missing_phase_rejected() {
        let key = PartitionKey::new(EntityType::Student, Program::Iti, 2022);
        let mut record = student(key);
        record.as_object_mut().unwrap().remove("Phase");
        let err = map_record(&key, &record).unwrap_err();
        assert_eq!(err.fields, vec!["phase"]);
        assert_eq!(err.natural_id, "B100");
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let key = PartitionKey::new(EntityType::Student, Program::Iti, 2022);
        let mut record = student(key);
        record["Year"] = json!(" ");
        record["Barcode"] = json!("NA");
        let err = map_record(&key, &record).unwrap_err();
        assert_eq!(err.fields, vec!["barcode", "year"]);
        assert_eq!(err.natural_id, "<unknown>");
    }

    #[test]
    fn institute_admission_type() {
        let record = json!({"SAMSCode": "I1", "InstituteName": "Govt ITI", "cuttoff": [1, 2]});

        let plain = PartitionKey::new(EntityType::Institute, Program::Iti, 2020);
        let row = map_record(&plain, &tag(record.clone(), &plain)).unwrap();
        assert_eq!(cell(&row, "admission_type"), &Cell::Int(0));
        assert_eq!(cell(&row, "cutoff"), &Cell::Text("[1,2]".into()));

        let lateral = PartitionKey::new(EntityType::Institute, Program::Diploma, 2020)
            .with_variant(AdmissionVariant::Lateral);
        let row = map_record(&lateral, &tag(record, &lateral)).unwrap();
        assert_eq!(cell(&row, "admission_type"), &Cell::Int(2));
        assert_eq!(row.natural_id, "I1");
    }
}
