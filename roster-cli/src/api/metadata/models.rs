//! SharePoint list column metadata models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Suffix SharePoint appends to the raw reference of a lookup or person column
pub const LOOKUP_ID_SUFFIX: &str = "LookupId";

/// Column definition as returned by `/lists/{id}/columns`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    /// Internal name (e.g. "field_2")
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Declared type, only present on some payloads
    #[serde(default, rename = "type")]
    pub declared_type: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Present when the column holds people or groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_or_group: Option<Value>,
    /// Present when the column references items of another list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<Value>,
}

/// Column data types relevant to reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Person,
    Lookup,
    Other(String),
}

impl ColumnDefinition {
    pub fn column_type(&self) -> ColumnType {
        if self.person_or_group.is_some() {
            return ColumnType::Person;
        }
        if self.lookup.is_some() {
            return ColumnType::Lookup;
        }

        match self.declared_type.as_deref().map(str::to_ascii_lowercase) {
            Some(t) if t == "person" || t == "user" || t == "personorgroup" => ColumnType::Person,
            Some(t) if t == "lookup" => ColumnType::Lookup,
            Some(t) => ColumnType::Other(t),
            None => ColumnType::Other("unknown".to_string()),
        }
    }

    /// Person and lookup columns, plus raw `...LookupId` columns
    pub fn is_lookup(&self) -> bool {
        matches!(self.column_type(), ColumnType::Person | ColumnType::Lookup)
            || self.name.ends_with(LOOKUP_ID_SUFFIX)
    }

    /// Name without the `LookupId` suffix
    pub fn base_name(&self) -> &str {
        lookup_base_name(&self.name).unwrap_or(&self.name)
    }
}

/// Strip the `LookupId` suffix, returning None when it isn't there
pub fn lookup_base_name(key: &str) -> Option<&str> {
    key.strip_suffix(LOOKUP_ID_SUFFIX)
        .filter(|base| !base.is_empty())
}

/// Internal → display column names for one list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// internal name -> display name
    pub mapping: BTreeMap<String, String>,
    /// Base names of lookup/person columns
    pub lookup_fields: Vec<String>,
}

impl FieldMapping {
    pub fn from_columns(columns: &[ColumnDefinition]) -> Self {
        let mut mapping = BTreeMap::new();
        let mut lookup_fields: Vec<String> = Vec::new();

        for column in columns {
            let display = column
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .unwrap_or(&column.name);
            mapping.insert(column.name.clone(), display.to_string());

            if column.is_lookup() {
                let base = column.base_name().to_string();
                if !lookup_fields.contains(&base) {
                    lookup_fields.push(base);
                }
            }
        }

        Self {
            mapping,
            lookup_fields,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn display_name(&self, internal: &str) -> Option<&str> {
        self.mapping.get(internal).map(String::as_str)
    }

    /// Reverse lookup, case-insensitive on the display name
    pub fn internal_name(&self, display: &str) -> Option<&str> {
        self.mapping
            .iter()
            .find(|(_, d)| d.eq_ignore_ascii_case(display))
            .map(|(internal, _)| internal.as_str())
    }

    /// Field that carries the human-readable value of a lookup
    pub fn lookup_display_field<'a>(&'a self, base: &'a str) -> &'a str {
        self.display_name(base).unwrap_or(base)
    }

    pub fn is_lookup_field(&self, base: &str) -> bool {
        self.lookup_fields.iter().any(|f| f == base)
    }
}
