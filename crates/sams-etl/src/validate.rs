//! Batch checks between download and load

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ValidationError;
use crate::partition::PartitionKey;
use crate::record::{columns, is_missing, snake_case};

/// Per-field missing-value counts for one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MissingReport {
    pub records: usize,
    /// snake_case field → records where it is missing (absent or blank)
    pub missing: BTreeMap<String, usize>,
}

impl MissingReport {
    pub fn build(records: &[Value]) -> Self {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        let mut blank: BTreeMap<String, usize> = BTreeMap::new();
        for obj in records.iter().filter_map(Value::as_object) {
            for (key, value) in obj {
                let key = snake_case(key);
                *seen.entry(key.clone()).or_default() += 1;
                if is_missing(value) {
                    *blank.entry(key).or_default() += 1;
                }
            }
        }
        let total = records.len();
        let missing = seen
            .into_iter()
            .map(|(key, present)| {
                let absent = total.saturating_sub(present);
                let n = absent + blank.get(&key).copied().unwrap_or(0);
                (key, n)
            })
            .filter(|(_, n)| *n > 0)
            .collect();
        Self {
            records: total,
            missing,
        }
    }

    pub fn missing_for(&self, field: &str) -> usize {
        self.missing.get(field).copied().unwrap_or(0)
    }

    /// Full report at debug, key-field gaps at info
    pub fn log(&self, partition: &PartitionKey) {
        for (field, n) in &self.missing {
            log::debug!("{partition}: {field} missing in {n}/{} records", self.records);
        }
        let key_gaps: Vec<String> = columns(partition.entity)
            .iter()
            .filter(|c| c.key)
            .filter_map(|c| {
                let n = self.missing_for(c.name);
                (n > 0).then(|| format!("{}={n}", c.name))
            })
            .collect();
        if !key_gaps.is_empty() {
            log::info!(
                "{partition}: key fields missing in {} records: {}",
                self.records,
                key_gaps.join(", ")
            );
        }
    }
}

/// Check that every record carries its partition's tags.
///
/// The tags come from the downloader, so a mismatch means records from
/// another partition leaked into this batch; nothing is loaded.
pub fn validate_batch(partition: &PartitionKey, records: &[Value]) -> Result<MissingReport, ValidationError> {
    let module = Value::from(partition.program.api_name());
    let year = Value::from(partition.period);
    let variant = partition.variant.map(|v| Value::from(v.code()));

    for (index, record) in records.iter().enumerate() {
        let obj = record
            .as_object()
            .ok_or(ValidationError::NotAnObject { index })?;
        check_tag(index, obj.get("module"), "module", &module)?;
        check_tag(index, obj.get("academic_year"), "academic_year", &year)?;
        if let Some(expected) = &variant {
            check_tag(index, obj.get("admission_type"), "admission_type", expected)?;
        }
    }
    Ok(MissingReport::build(records))
}

fn check_tag(
    index: usize,
    found: Option<&Value>,
    field: &'static str,
    expected: &Value,
) -> Result<(), ValidationError> {
    match found {
        None => Err(ValidationError::MissingTag { index, field }),
        Some(v) if is_missing(v) => Err(ValidationError::MissingTag { index, field }),
        Some(v) if v != expected => Err(ValidationError::WrongTag {
            index,
            field,
            expected: expected.to_string(),
            found: v.to_string(),
        }),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::tag;
    use crate::partition::{AdmissionVariant, EntityType, Program};
    use serde_json::json;

    #[test]
    fn tagged_batch_passes() {
        let key = PartitionKey::new(EntityType::Student, Program::Iti, 2022);
        let records = vec![
            tag(json!({"Barcode": "1", "Phase": "NA"}), &key),
            tag(json!({"Barcode": "2"}), &key),
        ];
        let report = validate_batch(&key, &records).unwrap();
        assert_eq!(report.records, 2);
        // blank in one, absent in the other
        assert_eq!(report.missing_for("phase"), 2);
        assert_eq!(report.missing_for("barcode"), 0);
    }

    #[test]
    fn untagged_record_fails() {
        let key = PartitionKey::new(EntityType::Student, Program::Iti, 2022);
        let records = vec![tag(json!({"Barcode": "1"}), &key), json!({"Barcode": "2"})];
        assert_eq!(
            validate_batch(&key, &records),
            Err(ValidationError::MissingTag {
                index: 1,
                field: "module"
            })
        );
    }

    #[test]
    fn foreign_year_fails() {
        let key = PartitionKey::new(EntityType::Student, Program::Iti, 2022);
        let other = PartitionKey::new(EntityType::Student, Program::Iti, 2021);
        let records = vec![tag(json!({"Barcode": "1"}), &other)];
        assert!(matches!(
            validate_batch(&key, &records),
            Err(ValidationError::WrongTag {
                field: "academic_year",
                ..
            })
        ));
    }

    #[test]
    fn mixed_admission_variants_fail() {
        let fresh = PartitionKey::new(EntityType::Institute, Program::Diploma, 2023)
            .with_variant(AdmissionVariant::Fresh);
        let lateral = fresh.with_variant(AdmissionVariant::Lateral);
        let records = vec![
            tag(json!({"SAMSCode": "A"}), &fresh),
            tag(json!({"SAMSCode": "B"}), &lateral),
        ];
        assert!(matches!(
            validate_batch(&fresh, &records),
            Err(ValidationError::WrongTag {
                index: 1,
                field: "admission_type",
                ..
            })
        ));
    }

    #[test]
    fn non_object_fails() {
        let key = PartitionKey::new(EntityType::Student, Program::Iti, 2022);
        assert_eq!(
            validate_batch(&key, &[json!([1, 2])]),
            Err(ValidationError::NotAnObject { index: 0 })
        );
    }
}
