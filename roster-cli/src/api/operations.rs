//! Write operations against list items

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::GraphClient;
use super::error::GraphError;
use super::models::Record;

/// A single mutation of a list item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ItemOperation {
    /// PATCH the given fields of an item
    Update {
        list: String,
        id: String,
        /// Field values keyed by internal name
        fields: Value,
    },
    /// Delete an item
    Delete { list: String, id: String },
}

/// Outcome of executing an [`ItemOperation`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation: ItemOperation,
    /// Fields as stored by SharePoint, for updates
    pub record: Option<Record>,
}

impl ItemOperation {
    pub fn update(list: impl Into<String>, id: impl Into<String>, fields: Value) -> Self {
        Self::Update {
            list: list.into(),
            id: id.into(),
            fields,
        }
    }

    pub fn delete(list: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Delete {
            list: list.into(),
            id: id.into(),
        }
    }

    pub fn list(&self) -> &str {
        match self {
            Self::Update { list, .. } | Self::Delete { list, .. } => list,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    pub fn http_method(&self) -> &'static str {
        match self {
            Self::Update { .. } => "PATCH",
            Self::Delete { .. } => "DELETE",
        }
    }

    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    pub async fn execute(&self, client: &GraphClient) -> Result<OperationResult, GraphError> {
        log::debug!(
            "{} {} item {} in '{}'",
            self.http_method(),
            self.operation_type(),
            self.id(),
            self.list()
        );

        let record = match self {
            Self::Update { list, id, fields } => {
                Some(client.update_item_fields(list, id, fields).await?)
            }
            Self::Delete { list, id } => {
                client.delete_item(list, id).await?;
                None
            }
        };

        Ok(OperationResult {
            operation: self.clone(),
            record,
        })
    }
}
