//! Terminal rendering of records

use anyhow::{Context, Result};
use colored::*;
use serde_json::Value;

use roster_cli::api::metadata::{FieldMapping, lookup_base_name};
use roster_cli::api::models::{Record, field_str};
use roster_cli::records::{FieldConflict, RecordSet, extract_employee_name};

/// Bookkeeping columns SharePoint adds to every item
const HIDDEN_FIELDS: &[&str] = &[
    "@odata.etag",
    "ContentType",
    "_UIVersionString",
    "Attachments",
    "Edit",
    "LinkTitle",
    "LinkTitleNoMenu",
    "ItemChildCount",
    "FolderChildCount",
    "_ComplianceFlags",
    "_ComplianceTag",
    "_ComplianceTagWrittenTime",
    "_ComplianceTagUserId",
    "AppAuthorLookupId",
    "AppEditorLookupId",
];

pub fn print_json(records: &[Record]) -> Result<()> {
    let json = serde_json::to_string_pretty(records).context("Failed to serialize records")?;
    println!("{}", json);
    Ok(())
}

/// Title of a record: `Title`, else a name found in its fields, else its id
pub fn record_title(record: &Record) -> String {
    field_str(record, "Title")
        .map(|t| t.into_owned())
        .or_else(|| extract_employee_name(record))
        .unwrap_or_else(|| format!("#{}", record_id(record)))
}

pub fn record_id(record: &Record) -> String {
    field_str(record, "Id")
        .map(|id| id.into_owned())
        .unwrap_or_else(|| "?".to_string())
}

/// Display fields holding resolved lookups, in mapping order
fn lookup_display_fields(record: &Record, mapping: &FieldMapping) -> Vec<String> {
    let mut fields: Vec<String> = record
        .keys()
        .filter(|key| !is_hidden(key))
        .filter_map(|key| lookup_base_name(key))
        .map(|base| mapping.lookup_display_field(base).to_string())
        .collect();
    fields.sort();
    fields.dedup();
    fields
}

fn is_hidden(key: &str) -> bool {
    HIDDEN_FIELDS.contains(&key) || key.starts_with("@odata")
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "-".dimmed().to_string(),
        Value::String(s) if s.starts_with("[ID: ") => s.yellow().to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

pub fn print_record_list(set: &RecordSet) {
    if set.records.is_empty() {
        println!("{}", format!("No records in '{}'", set.list).dimmed());
        return;
    }

    println!(
        "{} {}",
        set.list.bright_cyan().bold(),
        format!("({} records)", set.records.len()).dimmed()
    );

    for record in &set.records {
        let lookups: Vec<String> = lookup_display_fields(record, &set.mapping)
            .into_iter()
            .filter_map(|field| {
                record
                    .get(&field)
                    .map(|value| format!("{}: {}", field.dimmed(), format_value(value)))
            })
            .collect();

        println!(
            "  {:>6}  {}  {}",
            record_id(record).bright_black(),
            record_title(record).bold(),
            lookups.join("  ")
        );
    }

    print_conflicts(&set.conflicts);
}

pub fn print_record_detail(set: &RecordSet) {
    for record in &set.records {
        println!(
            "{} {}",
            record_title(record).bright_cyan().bold(),
            format!("({} #{})", set.list, record_id(record)).dimmed()
        );

        let width = record
            .keys()
            .map(|key| label(key, &set.mapping).chars().count())
            .max()
            .unwrap_or(0);

        for (key, value) in record {
            if is_hidden(key) {
                continue;
            }
            println!(
                "  {:<width$}  {}",
                label(key, &set.mapping).green(),
                format_value(value),
                width = width
            );
        }
    }

    print_conflicts(&set.conflicts);
}

/// `Display Name` for internal keys that have one, the key otherwise
fn label(key: &str, mapping: &FieldMapping) -> String {
    match mapping.display_name(key) {
        Some(display) if display != key => format!("{} ({})", display, key),
        _ => key.to_string(),
    }
}

pub fn print_conflicts(conflicts: &[FieldConflict]) {
    if conflicts.is_empty() {
        return;
    }

    println!();
    println!("{}", "Fields with differing internal and display values:".yellow());
    for conflict in conflicts {
        println!(
            "  #{} {} = {}  {} = {}",
            conflict.record_id.as_deref().unwrap_or("?"),
            conflict.internal,
            format_value(&conflict.internal_value),
            conflict.display,
            format_value(&conflict.display_value)
        );
    }
}

pub fn print_record_fields(title: &str, record: &Record) {
    println!("{}", title.bright_green());
    for (key, value) in record {
        if is_hidden(key) || key == "Id" {
            continue;
        }
        println!("  {}: {}", key.green(), format_value(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_record_title_fallbacks() {
        assert_eq!(record_title(&record(json!({"Id": "1", "Title": "LAPTOP-1"}))), "LAPTOP-1");
        assert_eq!(
            record_title(&record(json!({"Id": "2", "Title": "HPH0042", "FullName": "Jane Smith"}))),
            "HPH0042"
        );
        assert_eq!(record_title(&record(json!({"Id": 3}))), "#3");
    }

    #[test]
    fn test_lookup_display_fields_follow_mapping() {
        let mapping: FieldMapping = FieldMapping::from_columns(&[serde_json::from_value(
            json!({"name": "field_2", "displayName": "Assignee", "personOrGroup": {}}),
        )
        .unwrap()]);
        let rec = record(json!({
            "Id": "1",
            "field_2LookupId": "14",
            "Assignee": "Jane Smith",
            "AppAuthorLookupId": "1"
        }));

        assert_eq!(lookup_display_fields(&rec, &mapping), vec!["Assignee".to_string()]);
        assert_eq!(label("field_2", &mapping), "Assignee (field_2)");
        assert_eq!(label("Status", &mapping), "Status");
    }
}
