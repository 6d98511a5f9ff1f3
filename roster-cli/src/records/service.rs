//! Roster service: the operations a front end calls
//!
//! Reads run fetch → field mapping → normalization → lookup resolution.
//! Writes go straight to Graph; callers reload afterwards.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::assignment::{AssignmentState, assign_patch, unassign_patch};
use super::identity::{EmployeeCacheEntry, ReferenceKind, is_positive_integer};
use super::normalize::{FieldConflict, normalize_record};
use super::resolver::{LookupResolver, ResolutionStats};
use crate::api::client::GraphClient;
use crate::api::concurrency::ConcurrencyLimiter;
use crate::api::error::GraphError;
use crate::api::metadata::{self, FieldMapping};
use crate::api::models::{ListInfo, Record};
use crate::api::operations::ItemOperation;
use crate::config::{AssignmentSettings, Config, ListNames};

/// Normalized and resolved records of one list
#[derive(Debug, Clone)]
pub struct RecordSet {
    pub list: String,
    pub records: Vec<Record>,
    pub conflicts: Vec<FieldConflict>,
    pub mapping: FieldMapping,
    pub stats: ResolutionStats,
}

pub struct RosterService {
    client: GraphClient,
    lists: ListNames,
    assignments: BTreeMap<String, AssignmentSettings>,
    resolver: LookupResolver,
}

impl RosterService {
    pub fn new(client: GraphClient, config: &Config) -> Self {
        let limiter = ConcurrencyLimiter::new(config.api.concurrency());
        let resolver = LookupResolver::new(
            Arc::new(client.clone()),
            config.lists.clone(),
            limiter,
        )
        .with_session_cache(client.session().clone());

        Self {
            client,
            lists: config.lists.clone(),
            assignments: config.assignment.clone(),
            resolver,
        }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    pub fn list_names(&self) -> &ListNames {
        &self.lists
    }

    pub async fn lists(&self) -> Result<Vec<ListInfo>, GraphError> {
        self.client.lists().await
    }

    pub async fn field_mapping(&self, list_name: &str) -> FieldMapping {
        metadata::field_mapping(&self.client, list_name).await
    }

    /// All items of a list, normalized, with every lookup resolved
    pub async fn get_records(
        &self,
        list_name: &str,
        employees: &[EmployeeCacheEntry],
    ) -> Result<RecordSet, GraphError> {
        let mapping = self.field_mapping(list_name).await;
        let items = self.client.list_items(list_name).await?;
        self.build_record_set(list_name, items, mapping, employees)
            .await
    }

    pub async fn get_record(
        &self,
        list_name: &str,
        item_id: &str,
        employees: &[EmployeeCacheEntry],
    ) -> Result<RecordSet, GraphError> {
        let mapping = self.field_mapping(list_name).await;
        let item = self.client.get_item(list_name, item_id).await?;
        self.build_record_set(list_name, vec![item], mapping, employees)
            .await
    }

    async fn build_record_set(
        &self,
        list_name: &str,
        items: Vec<Record>,
        mapping: FieldMapping,
        employees: &[EmployeeCacheEntry],
    ) -> Result<RecordSet, GraphError> {
        let mut records = Vec::with_capacity(items.len());
        let mut conflicts = Vec::new();
        for item in items {
            let normalized = normalize_record(item, &mapping);
            conflicts.extend(normalized.conflicts);
            records.push(normalized.fields);
        }

        if !conflicts.is_empty() {
            log::warn!(
                "{} field(s) in '{}' differ between internal and display names",
                conflicts.len(),
                list_name
            );
        }

        let stats = self
            .resolver
            .resolve_records(&mut records, &mapping, employees)
            .await?;

        log::info!("Loaded {} record(s) from '{}'", records.len(), list_name);
        Ok(RecordSet {
            list: list_name.to_string(),
            records,
            conflicts,
            mapping,
            stats,
        })
    }

    /// PATCH fields of an item. Keys may be display names; they are sent
    /// under their internal names.
    pub async fn update_record(
        &self,
        list_name: &str,
        item_id: &str,
        fields: Record,
    ) -> Result<Record, GraphError> {
        let mapping = self.field_mapping(list_name).await;
        let fields = to_internal_names(fields, &mapping);
        let result = ItemOperation::update(list_name, item_id, Value::Object(fields))
            .execute(&self.client)
            .await?;
        Ok(result.record.unwrap_or_default())
    }

    pub async fn delete_record(&self, list_name: &str, item_id: &str) -> Result<(), GraphError> {
        ItemOperation::delete(list_name, item_id)
            .execute(&self.client)
            .await?;
        Ok(())
    }

    pub fn assignment_settings(&self, list_name: &str) -> Result<&AssignmentSettings, GraphError> {
        self.assignments
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(list_name.trim()))
            .map(|(_, settings)| settings)
            .ok_or_else(|| GraphError::NotFound {
                what: format!("assignment settings for list '{}'", list_name),
                available: self.assignments.keys().cloned().collect(),
            })
    }

    pub async fn assignment_state(
        &self,
        list_name: &str,
        item_id: &str,
    ) -> Result<AssignmentState, GraphError> {
        let settings = self.assignment_settings(list_name)?;
        let item = self.client.get_item(list_name, item_id).await?;
        Ok(AssignmentState::of(&item, settings))
    }

    /// Assign an item to an employee. The employee is resolved into the
    /// list's identity space first; nothing is written when that fails.
    pub async fn assign(
        &self,
        list_name: &str,
        item_id: &str,
        employee: &str,
    ) -> Result<Record, GraphError> {
        let settings = self.assignment_settings(list_name)?;
        let target = self.resolve_assignee(employee).await?;

        log::info!(
            "Assigning item {} in '{}' to {} (user item {})",
            item_id,
            list_name,
            employee,
            target
        );
        let patch = assign_patch(settings, &target);
        let result = ItemOperation::update(list_name, item_id, patch)
            .execute(&self.client)
            .await?;
        Ok(result.record.unwrap_or_default())
    }

    pub async fn unassign(&self, list_name: &str, item_id: &str) -> Result<Record, GraphError> {
        let settings = self.assignment_settings(list_name)?;

        log::info!("Unassigning item {} in '{}'", item_id, list_name);
        let result = ItemOperation::update(list_name, item_id, unassign_patch(settings))
            .execute(&self.client)
            .await?;
        Ok(result.record.unwrap_or_default())
    }

    pub async fn resolve_sharepoint_user_id(
        &self,
        id_or_email: &str,
    ) -> Result<Option<String>, GraphError> {
        self.resolver.resolve_sharepoint_user_id(id_or_email).await
    }

    /// Target id for an assignment: forward resolution, then the raw id
    /// when it already is an item id, then forward resolution by the
    /// employee's email.
    async fn resolve_assignee(&self, employee: &str) -> Result<String, GraphError> {
        let employee = employee.trim();

        if let Some(id) = self.try_forward(employee).await? {
            return Ok(id);
        }

        if is_positive_integer(employee) {
            log::debug!("Using '{}' as a list item id directly", employee);
            return Ok(employee.to_string());
        }

        let email = match ReferenceKind::classify(employee) {
            ReferenceKind::Unknown => None,
            _ => self
                .resolver
                .resolve_reference(employee, &[])
                .await?
                .and_then(|identity| identity.email),
        };
        if let Some(email) = email.filter(|e| !e.eq_ignore_ascii_case(employee)) {
            log::debug!("Retrying forward resolution of '{}' as {}", employee, email);
            if let Some(id) = self.try_forward(&email).await? {
                return Ok(id);
            }
        }

        log::warn!("Could not resolve '{}' to a SharePoint user", employee);
        Err(GraphError::ResolutionFailure {
            reference: employee.to_string(),
        })
    }

    /// Forward resolution where only an expired session is fatal
    async fn try_forward(&self, id_or_email: &str) -> Result<Option<String>, GraphError> {
        match self.resolver.resolve_sharepoint_user_id(id_or_email).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_session_expired() => Err(e),
            Err(e) => {
                log::debug!("Forward resolution of '{}' failed: {}", id_or_email, e);
                Ok(None)
            }
        }
    }

    /// Employee cache from the Employees list, optionally joined with all
    /// directory users
    pub async fn load_employee_cache(
        &self,
        include_directory: bool,
    ) -> Result<Vec<EmployeeCacheEntry>, GraphError> {
        let items = self.client.list_items(&self.lists.employees).await?;
        let mut entries: Vec<EmployeeCacheEntry> = items
            .iter()
            .filter_map(EmployeeCacheEntry::from_employee_record)
            .collect();

        if include_directory {
            let users = self.client.list_users().await?;
            entries.extend(users.iter().map(EmployeeCacheEntry::from_directory_user));
        }

        log::debug!("Employee cache holds {} entries", entries.len());
        Ok(entries)
    }
}

/// Rename display-name keys to the internal names Graph expects on writes
pub fn to_internal_names(fields: Record, mapping: &FieldMapping) -> Record {
    fields
        .into_iter()
        .map(|(key, value)| {
            if mapping.display_name(&key).is_some() {
                return (key, value);
            }
            match mapping.internal_name(&key) {
                Some(internal) => (internal.to_string(), value),
                None => (key, value),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::SiteLocation;
    use crate::api::models::TokenInfo;
    use crate::api::session::Session;
    use crate::records::resolver::placeholder;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DIRECTORY_GUID: &str = "6a1f0d2c-8b3e-4c55-9d7a-0e4f2b1c3d5e";

    async fn service_for(server: &MockServer) -> RosterService {
        let session = Arc::new(Session::with_token(TokenInfo::new(
            "test-token".to_string(),
            None,
            3600,
        )));
        let client =
            GraphClient::new(server.uri(), SiteLocation::Id("site-1".to_string()), session)
                .unwrap();

        Mock::given(method("GET"))
            .and(path("/sites/site-1/lists"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"id": "list-assets", "name": "Assets", "displayName": "Assets"},
                    {"id": "list-employees", "name": "Employees", "displayName": "Employees"},
                    {"id": "list-cards", "name": "AccessCards", "displayName": "Access Cards"},
                    {"id": "list-users", "name": "users", "displayName": "User Information List"}
                ]
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/sites/site-1/lists/list-assets/columns"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"name": "Title", "displayName": "Asset Tag"},
                    {"name": "field_2", "displayName": "Assignee", "personOrGroup": {}},
                    {"name": "Status", "displayName": "Status"}
                ]
            })))
            .mount(server)
            .await;

        RosterService::new(client, &Config::with_defaults())
    }

    async fn mount_user_information(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/sites/site-1/lists/list-users/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"id": "31", "fields": {"Title": "Jane Smith", "EMail": "Jane.Smith@Contoso.com"}},
                    {"id": "32", "fields": {"Title": "Grace Hopper", "UserName": "i:0#.f|membership|grace@contoso.com"}}
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_get_records_normalizes_and_resolves() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/sites/site-1/lists/list-assets/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"id": "1", "fields": {"Title": "LAPTOP-1", "Asset Tag": "LAPTOP-1", "field_2LookupId": "14"}},
                    {"id": "2", "fields": {"Title": "LAPTOP-2", "field_2LookupId": "15"}},
                    {"id": "3", "fields": {"Title": "PHONE-3", "field_2LookupId": DIRECTORY_GUID}},
                    {"id": "4", "fields": {"Title": "PHONE-4", "field_2LookupId": "999"}}
                ]
            })))
            .mount(&server)
            .await;
        for (id, name) in [("14", "Jane Smith"), ("15", "Alan Turing")] {
            Mock::given(method("GET"))
                .and(path(format!("/sites/site-1/lists/list-employees/items/{}", id)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "id": id,
                    "fields": {"Title": name}
                })))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path(format!("/users/{}", DIRECTORY_GUID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": DIRECTORY_GUID,
                "displayName": "Grace Hopper",
                "mail": "grace@contoso.com"
            })))
            .mount(&server)
            .await;

        let set = service.get_records("Assets", &[]).await.unwrap();

        assert_eq!(set.records.len(), 4);
        let assignees: Vec<&str> = set
            .records
            .iter()
            .map(|r| r["Assignee"].as_str().unwrap())
            .collect();
        assert_eq!(
            assignees,
            vec!["Jane Smith", "Alan Turing", "Grace Hopper", placeholder("999").as_str()]
        );
        assert!(!set.records[0].contains_key("Asset Tag"));
        assert_eq!(set.records[0]["Id"], "1");
        assert!(set.conflicts.is_empty());
        assert_eq!(set.stats.placeholders, 1);
    }

    #[tokio::test]
    async fn test_get_records_surfaces_expired_session() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/sites/site-1/lists/list-assets/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"id": "1", "fields": {"Title": "LAPTOP-1", "field_2LookupId": "14"}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sites/site-1/lists/list-employees/items/14"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = service.get_records("Assets", &[]).await.unwrap_err();

        assert!(err.is_session_expired());
        assert!(!service.client().session().is_authenticated());
    }

    #[tokio::test]
    async fn test_assign_sends_single_patch() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;
        mount_user_information(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/sites/site-1/lists/list-assets/items/5/fields"))
            .and(body_json(json!({"field_2LookupId": "31", "Status": "Assigned"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "field_2LookupId": "31",
                "Status": "Assigned"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = service
            .assign("Assets", "5", "jane.smith@contoso.com")
            .await
            .unwrap();
        assert_eq!(record["Id"], "5");
        assert_eq!(record["Status"], "Assigned");
    }

    #[tokio::test]
    async fn test_assign_uses_card_columns() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;
        mount_user_information(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/sites/site-1/lists/list-cards/items/8/fields"))
            .and(body_json(json!({"EmployeeLookupId": "32", "CardStatus": "Assigned"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        service
            .assign("Access Cards", "8", "grace@contoso.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_assign_falls_back_to_item_id() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;
        mount_user_information(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/sites/site-1/lists/list-assets/items/5/fields"))
            .and(body_json(json!({"field_2LookupId": "42", "Status": "Assigned"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        service.assign("Assets", "5", "42").await.unwrap();
    }

    #[tokio::test]
    async fn test_assign_retries_with_directory_email() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;
        mount_user_information(&server).await;

        // The list knows the mailbox address, the caller passed the principal name
        Mock::given(method("GET"))
            .and(path("/users/jsmith%40contoso.onmicrosoft.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": DIRECTORY_GUID,
                "displayName": "J. Smith",
                "mail": "jane.smith@contoso.com",
                "userPrincipalName": "jsmith@contoso.onmicrosoft.com"
            })))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/sites/site-1/lists/list-assets/items/5/fields"))
            .and(body_json(json!({"field_2LookupId": "31", "Status": "Assigned"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        service
            .assign("Assets", "5", "jsmith@contoso.onmicrosoft.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unresolved_assignee_sends_nothing() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;
        mount_user_information(&server).await;

        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let err = service
            .assign("Assets", "5", "ghost@contoso.com")
            .await
            .unwrap_err();
        match err {
            GraphError::ResolutionFailure { reference } => {
                assert_eq!(reference, "ghost@contoso.com")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_unassign_clears_both_fields() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/sites/site-1/lists/list-assets/items/5/fields"))
            .and(body_json(json!({"field_2LookupId": null, "Status": "Available"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Status": "Available"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = service.unassign("Assets", "5").await.unwrap();
        assert_eq!(record["Status"], "Available");
    }

    #[tokio::test]
    async fn test_unconfigured_list_cannot_be_assigned() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;

        let err = service.assign("Employees", "1", "42").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Assets"));
    }

    #[tokio::test]
    async fn test_update_record_uses_internal_names() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/sites/site-1/lists/list-assets/items/5/fields"))
            .and(body_json(json!({"Title": "LAPTOP-9", "Status": "Retired"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Title": "LAPTOP-9",
                "Status": "Retired"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut fields = Record::new();
        fields.insert("asset tag".to_string(), json!("LAPTOP-9"));
        fields.insert("Status".to_string(), json!("Retired"));
        let record = service.update_record("Assets", "5", fields).await.unwrap();
        assert_eq!(record["Title"], "LAPTOP-9");
    }

    #[tokio::test]
    async fn test_delete_record() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/sites/site-1/lists/list-assets/items/5"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        service.delete_record("Assets", "5").await.unwrap();
    }

    #[tokio::test]
    async fn test_employee_cache_from_list() {
        let server = MockServer::start().await;
        let service = service_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/sites/site-1/lists/list-employees/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"id": "14", "fields": {"Title": "Jane Smith", "EmpID": "E-14", "Email": "jane@contoso.com"}}
                ]
            })))
            .mount(&server)
            .await;

        let cache = service.load_employee_cache(false).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache[0].id, "14");
        assert_eq!(cache[0].emp_id.as_deref(), Some("E-14"));
        assert_eq!(cache[0].name(), "Jane Smith");
    }

    #[test]
    fn test_to_internal_names_keeps_internal_keys() {
        let mapping = FieldMapping::from_columns(&[
            serde_json::from_value(json!({"name": "field_2", "displayName": "Assignee"})).unwrap(),
            serde_json::from_value(json!({"name": "Title", "displayName": "Asset Tag"})).unwrap(),
        ]);
        let mut fields = Record::new();
        fields.insert("field_2".to_string(), json!("x"));
        fields.insert("ASSET TAG".to_string(), json!("y"));
        fields.insert("Notes".to_string(), json!("z"));

        let fields = to_internal_names(fields, &mapping);
        assert_eq!(fields["field_2"], "x");
        assert_eq!(fields["Title"], "y");
        assert_eq!(fields["Notes"], "z");
    }
}
