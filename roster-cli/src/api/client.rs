//! Microsoft Graph client for SharePoint lists and directory users

use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::constants::{
    ITEM_PAGE_SIZE, MAX_ITEM_PAGES, MAX_USER_INFO_PAGES, MAX_USER_PAGES, TOKEN_ERROR_MARKERS,
    USER_SELECT,
};
use super::error::GraphError;
use super::metadata::ColumnDefinition;
use super::models::{DirectoryRole, DirectoryUser, ListInfo, Record};
use super::session::Session;

/// Where the SharePoint site lives
#[derive(Debug, Clone, PartialEq)]
pub enum SiteLocation {
    /// Graph site id (`host,siteCollectionId,webId`)
    Id(String),
    /// Hostname plus server-relative path (e.g. `contoso.sharepoint.com`, `/sites/IT`)
    Path { host: String, path: String },
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    site: SiteLocation,
    session: Arc<Session>,
}

impl GraphClient {
    pub fn new(
        base_url: impl Into<String>,
        site: SiteLocation,
        session: Arc<Session>,
    ) -> Result<Self, GraphError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            site,
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Without a token no request is issued at all
    fn bearer(&self) -> Result<String, GraphError> {
        self.session.access_token().ok_or(GraphError::SessionExpired)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value, GraphError> {
        let token = self.bearer()?;
        let response = request
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        self.handle_response(response, what).await
    }

    async fn handle_response(
        &self,
        response: reqwest::Response,
        what: &str,
    ) -> Result<Value, GraphError> {
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| {
                GraphError::Parse(format!("{} returned invalid JSON: {}", what, e))
            });
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error body".to_string());

        match status {
            StatusCode::UNAUTHORIZED => Err(self.expire_session(what)),
            StatusCode::FORBIDDEN if is_token_error(&body) => Err(self.expire_session(what)),
            StatusCode::NOT_FOUND => Err(GraphError::not_found(what)),
            _ => Err(GraphError::Transport {
                status: status.as_u16(),
                message: graph_error_message(&body),
            }),
        }
    }

    fn expire_session(&self, what: &str) -> GraphError {
        log::warn!("Graph rejected the access token while fetching {}", what);
        self.session.invalidate();
        GraphError::SessionExpired
    }

    pub async fn get(&self, path: &str) -> Result<Value, GraphError> {
        self.send(self.http.get(self.url(path)), path).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value, GraphError> {
        self.send(self.http.patch(self.url(path)).json(body), path).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), GraphError> {
        self.send(self.http.delete(self.url(path)), path).await?;
        Ok(())
    }

    /// GET a collection, following `@odata.nextLink` for at most `max_pages` pages
    pub async fn get_paged(&self, path: &str, max_pages: usize) -> Result<Vec<Value>, GraphError> {
        let mut url = self.url(path);
        let mut values = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = self.get(&url).await?;
            pages += 1;

            let Value::Object(mut page) = page else {
                return Err(GraphError::Parse(format!("{} did not return an object", path)));
            };

            if let Some(Value::Array(items)) = page.remove("value") {
                values.extend(items);
            }

            let next = page
                .remove("@odata.nextLink")
                .and_then(|v| v.as_str().map(str::to_string));

            match next {
                Some(next) if pages < max_pages => url = next,
                Some(_) => {
                    log::warn!(
                        "Stopped paging {} after {} pages ({} items)",
                        path,
                        pages,
                        values.len()
                    );
                    break;
                }
                None => break,
            }
        }

        log::debug!("Fetched {} items from {} in {} pages", values.len(), path, pages);
        Ok(values)
    }

    /// Graph site id, resolved from the configured location once per session
    pub async fn site_id(&self) -> Result<String, GraphError> {
        let (host, path) = match &self.site {
            SiteLocation::Id(id) => return Ok(id.clone()),
            SiteLocation::Path { host, path } => (host, path),
        };

        if let Some(id) = self.session.site_id() {
            return Ok(id);
        }

        let path = path.trim_matches('/');
        let request_path = if path.is_empty() {
            format!("/sites/{}", host)
        } else {
            format!("/sites/{}:/{}", host, path)
        };

        let site = self.get(&request_path).await?;
        let id = site
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::Parse("site response has no id".to_string()))?;

        log::info!("Resolved site {}/{} to {}", host, path, id);
        self.session.cache_site_id(id);
        Ok(id.to_string())
    }

    pub async fn lists(&self) -> Result<Vec<ListInfo>, GraphError> {
        let site = self.site_id().await?;
        let values = self
            .get_paged(
                &format!("/sites/{}/lists?$select=id,name,displayName", site),
                MAX_ITEM_PAGES,
            )
            .await?;

        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(GraphError::from))
            .collect()
    }

    /// Resolve a list name (display or URL name) to its id
    ///
    /// Hidden lists such as the User Information List are not part of the
    /// `/lists` collection, so a direct fetch by title is tried before
    /// giving up.
    pub async fn list_id(&self, list_name: &str) -> Result<String, GraphError> {
        if let Some(id) = self.session.list_id(list_name) {
            return Ok(id);
        }

        let lists = self.lists().await?;
        if let Some(list) = lists.iter().find(|l| l.matches(list_name)) {
            self.session.cache_list_id(list_name, &list.id);
            return Ok(list.id.clone());
        }

        let site = self.site_id().await?;
        let by_title = format!(
            "/sites/{}/lists/{}?$select=id,name,displayName",
            site,
            urlencoding::encode(list_name)
        );
        match self.get(&by_title).await {
            Ok(list) => {
                let list: ListInfo = serde_json::from_value(list)?;
                self.session.cache_list_id(list_name, &list.id);
                Ok(list.id)
            }
            Err(GraphError::NotFound { .. }) => Err(GraphError::NotFound {
                what: format!("list '{}'", list_name),
                available: lists.iter().map(|l| l.title().to_string()).collect(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn list_path(&self, list_name: &str) -> Result<String, GraphError> {
        let site = self.site_id().await?;
        let list = self.list_id(list_name).await?;
        Ok(format!("/sites/{}/lists/{}", site, list))
    }

    pub async fn list_columns(&self, list_name: &str) -> Result<Vec<ColumnDefinition>, GraphError> {
        let path = format!("{}/columns", self.list_path(list_name).await?);
        let values = self.get_paged(&path, MAX_ITEM_PAGES).await?;

        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(GraphError::from))
            .collect()
    }

    pub async fn list_items(&self, list_name: &str) -> Result<Vec<Record>, GraphError> {
        self.list_items_capped(list_name, MAX_ITEM_PAGES).await
    }

    pub async fn list_items_capped(
        &self,
        list_name: &str,
        max_pages: usize,
    ) -> Result<Vec<Record>, GraphError> {
        let path = format!(
            "{}/items?expand=fields&$top={}",
            self.list_path(list_name).await?,
            ITEM_PAGE_SIZE
        );
        let items = self.get_paged(&path, max_pages).await?;
        Ok(items.into_iter().map(item_to_record).collect())
    }

    pub async fn get_item(&self, list_name: &str, item_id: &str) -> Result<Record, GraphError> {
        let path = format!(
            "{}/items/{}?expand=fields",
            self.list_path(list_name).await?,
            urlencoding::encode(item_id)
        );

        match self.get(&path).await {
            Ok(item) => Ok(item_to_record(item)),
            Err(GraphError::NotFound { .. }) => Err(GraphError::not_found(format!(
                "item {} in list '{}'",
                item_id, list_name
            ))),
            Err(e) => Err(e),
        }
    }

    /// PATCH the item's fields; returns the fields as stored by SharePoint
    pub async fn update_item_fields(
        &self,
        list_name: &str,
        item_id: &str,
        fields: &Value,
    ) -> Result<Record, GraphError> {
        let path = format!(
            "{}/items/{}/fields",
            self.list_path(list_name).await?,
            urlencoding::encode(item_id)
        );

        log::info!("Updating item {} in '{}': {}", item_id, list_name, fields);
        let updated = self.patch(&path, fields).await?;
        let mut record = match updated {
            Value::Object(map) => map,
            _ => Record::new(),
        };
        record.insert("Id".to_string(), Value::String(item_id.to_string()));
        Ok(record)
    }

    pub async fn delete_item(&self, list_name: &str, item_id: &str) -> Result<(), GraphError> {
        let path = format!(
            "{}/items/{}",
            self.list_path(list_name).await?,
            urlencoding::encode(item_id)
        );

        log::info!("Deleting item {} from '{}'", item_id, list_name);
        self.delete(&path).await
    }

    /// Directory user by object id or principal name; None when absent
    pub async fn get_user(&self, id_or_upn: &str) -> Result<Option<DirectoryUser>, GraphError> {
        let path = format!(
            "/users/{}?$select={}",
            urlencoding::encode(id_or_upn),
            USER_SELECT
        );

        match self.get(&path).await {
            Ok(user) => Ok(Some(serde_json::from_value(user)?)),
            Err(GraphError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<DirectoryUser>, GraphError> {
        let path = format!("/users?$select={}&$top=999", USER_SELECT);
        let values = self.get_paged(&path, MAX_USER_PAGES).await?;

        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(GraphError::from))
            .collect()
    }

    pub async fn me(&self) -> Result<DirectoryUser, GraphError> {
        let me = self.get(&format!("/me?$select={}", USER_SELECT)).await?;
        Ok(serde_json::from_value(me)?)
    }

    pub async fn my_directory_roles(&self) -> Result<Vec<DirectoryRole>, GraphError> {
        let values = self
            .get_paged("/me/memberOf/microsoft.graph.directoryRole", MAX_USER_PAGES)
            .await?;

        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(GraphError::from))
            .collect()
    }

    /// Items of the site's User Information List, bounded page scan
    pub async fn user_information_items(&self, list_name: &str) -> Result<Vec<Record>, GraphError> {
        self.list_items_capped(list_name, MAX_USER_INFO_PAGES).await
    }
}

/// Flatten a Graph list item into its fields plus an `Id`
pub fn item_to_record(item: Value) -> Record {
    let Value::Object(mut item) = item else {
        return Record::new();
    };

    let id = item.remove("id");
    let mut record = match item.remove("fields") {
        Some(Value::Object(fields)) => fields,
        _ => Record::new(),
    };

    if let Some(id) = id {
        record.insert("Id".to_string(), id);
    } else if let Some(id) = record.get("id").cloned() {
        record.insert("Id".to_string(), id);
    }
    record
}

/// Whether a 403 body describes a token problem rather than missing rights
pub fn is_token_error(body: &str) -> bool {
    let lower = body.to_lowercase();
    TOKEN_ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Pull `code: message` out of a Graph error body
fn graph_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let error = &value["error"];
        let code = error["code"].as_str();
        let message = error["message"].as_str();
        match (code, message) {
            (Some(code), Some(message)) => return format!("{}: {}", code, message),
            (None, Some(message)) => return message.to_string(),
            (Some(code), None) => return code.to_string(),
            (None, None) => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        format!("{}...", trimmed.chars().take(200).collect::<String>())
    } else {
        trimmed.to_string()
    }
}
