//! Read access the resolver needs, abstracted from the HTTP client

use async_trait::async_trait;

use crate::api::client::GraphClient;
use crate::api::error::GraphError;
use crate::api::models::{DirectoryUser, Record};

/// Collections a lookup reference can point into
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Directory user by object id or principal name
    async fn directory_user(&self, id_or_upn: &str) -> Result<Option<DirectoryUser>, GraphError>;

    /// Fields of a list item, or None when the item does not exist
    async fn list_item(&self, list_name: &str, item_id: &str) -> Result<Option<Record>, GraphError>;

    /// All (page-capped) items of the User Information List
    async fn user_information_items(&self, list_name: &str) -> Result<Vec<Record>, GraphError>;
}

#[async_trait]
impl IdentitySource for GraphClient {
    async fn directory_user(&self, id_or_upn: &str) -> Result<Option<DirectoryUser>, GraphError> {
        self.get_user(id_or_upn).await
    }

    async fn list_item(&self, list_name: &str, item_id: &str) -> Result<Option<Record>, GraphError> {
        match self.get_item(list_name, item_id).await {
            Ok(record) => Ok(Some(record)),
            Err(GraphError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn user_information_items(&self, list_name: &str) -> Result<Vec<Record>, GraphError> {
        GraphClient::user_information_items(self, list_name).await
    }
}
