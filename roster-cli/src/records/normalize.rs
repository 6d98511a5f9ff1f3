//! Collapse duplicate internal/display keys on raw list items

use serde::Serialize;
use serde_json::Value;

use crate::api::metadata::FieldMapping;
use crate::api::models::Record;

/// Internal and display key both present with different values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConflict {
    pub record_id: Option<String>,
    pub internal: String,
    pub display: String,
    pub internal_value: Value,
    pub display_value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    pub fields: Record,
    pub conflicts: Vec<FieldConflict>,
}

/// Drop the display-name key wherever it duplicates the internal key's value.
///
/// Values are compared by their serialized JSON. When they differ, both keys
/// stay and the pair is reported as a conflict. Keys are only ever removed.
pub fn normalize_record(record: Record, mapping: &FieldMapping) -> NormalizedRecord {
    let mut fields = record;
    let mut conflicts = Vec::new();
    let record_id = fields.get("Id").map(|id| match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    for (internal, display) in &mapping.mapping {
        if internal == display || mapping.mapping.contains_key(display) {
            continue;
        }

        let (Some(internal_value), Some(display_value)) = (fields.get(internal), fields.get(display))
        else {
            continue;
        };

        if same_value(internal_value, display_value) {
            fields.remove(display);
        } else {
            log::debug!(
                "Keeping both '{}' and '{}' on record {:?}: values differ",
                internal,
                display,
                record_id
            );
            conflicts.push(FieldConflict {
                record_id: record_id.clone(),
                internal: internal.clone(),
                display: display.clone(),
                internal_value: internal_value.clone(),
                display_value: display_value.clone(),
            });
        }
    }

    NormalizedRecord { fields, conflicts }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (serde_json::to_string(a), serde_json::to_string(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
