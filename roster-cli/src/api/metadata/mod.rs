//! List column metadata and the internal → display field mapper

pub mod models;

pub use models::{ColumnDefinition, ColumnType, FieldMapping, LOOKUP_ID_SUFFIX, lookup_base_name};

use super::client::GraphClient;

/// Column mapping for a list, fetched once per session
///
/// A failed fetch is cached as an empty mapping: callers then keep working
/// with internal names instead of failing the whole screen.
pub async fn field_mapping(client: &GraphClient, list_name: &str) -> FieldMapping {
    if let Some(mapping) = client.session().field_mapping(list_name) {
        return mapping;
    }

    let mapping = match client.list_columns(list_name).await {
        Ok(columns) => {
            let mapping = FieldMapping::from_columns(&columns);
            log::debug!(
                "Mapped {} columns for '{}' ({} lookups: {:?})",
                mapping.mapping.len(),
                list_name,
                mapping.lookup_fields.len(),
                mapping.lookup_fields
            );
            mapping
        }
        Err(e) => {
            log::warn!("Could not load columns for '{}': {}", list_name, e);
            FieldMapping::default()
        }
    };

    client.session().cache_field_mapping(list_name, mapping.clone());
    mapping
}
