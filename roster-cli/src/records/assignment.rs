//! Per-record assignment state: Available <-> Assigned
//!
//! The lookup column and the status column are always written together in
//! one PATCH so no half-assigned item is ever observable.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::api::metadata::LOOKUP_ID_SUFFIX;
use crate::api::models::{Record, field_str};
use crate::config::AssignmentSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AssignmentState {
    Available,
    Assigned { lookup_id: String },
}

impl AssignmentState {
    /// Current state of a record, read from its `<lookup>LookupId` field
    pub fn of(record: &Record, settings: &AssignmentSettings) -> Self {
        match field_str(record, &lookup_id_field(settings)) {
            Some(id) => Self::Assigned {
                lookup_id: id.into_owned(),
            },
            None => Self::Available,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }
}

/// `<lookup>LookupId`, the column that takes the raw reference on writes
pub fn lookup_id_field(settings: &AssignmentSettings) -> String {
    let lookup = settings.lookup_field.trim();
    if lookup.ends_with(LOOKUP_ID_SUFFIX) {
        lookup.to_string()
    } else {
        format!("{}{}", lookup, LOOKUP_ID_SUFFIX)
    }
}

/// Fields for `Available -> Assigned`
pub fn assign_patch(settings: &AssignmentSettings, target_id: &str) -> Value {
    let mut fields = Map::new();
    fields.insert(
        lookup_id_field(settings),
        Value::String(target_id.trim().to_string()),
    );
    fields.insert(
        settings.status_field.clone(),
        Value::String(settings.assigned_value.clone()),
    );
    Value::Object(fields)
}

/// Fields for `Assigned -> Available`
pub fn unassign_patch(settings: &AssignmentSettings) -> Value {
    let mut fields = Map::new();
    fields.insert(lookup_id_field(settings), Value::Null);
    fields.insert(
        settings.status_field.clone(),
        Value::String(settings.available_value.clone()),
    );
    Value::Object(fields)
}

/// Merge patch fields into a local record copy
pub fn apply_patch(record: &mut Record, patch: &Value) {
    if let Value::Object(fields) = patch {
        for (key, value) in fields {
            record.insert(key.clone(), value.clone());
        }
    }
}
