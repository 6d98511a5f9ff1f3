//! Lookup resolution: turn raw `<Field>LookupId` references into names
//!
//! Order of strategies for one reference, first hit wins:
//! 1. an already expanded sibling object that carries the same id
//! 2. GUIDs: directory user, then the employee cache by id
//! 3. positive integers: Employees item, Access Cards item (its embedded
//!    employee), User Information List item, then the employee cache by
//!    employee number / principal prefix
//! 4. emails: employee cache, then directory user by principal name
//!
//! Anything left unresolved is rendered as `[ID: <raw>]`.

use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::identity::{
    EmployeeCacheEntry, ReferenceKind, embedded_person_name, extract_employee_name,
    is_positive_integer, strip_claims,
};
use super::source::IdentitySource;
use crate::api::concurrency::ConcurrencyLimiter;
use crate::api::error::GraphError;
use crate::api::metadata::{FieldMapping, lookup_base_name};
use crate::api::models::{Record, ResolvedIdentity, field_str};
use crate::api::session::Session;
use crate::config::ListNames;

const EMAIL_FIELDS: &[&str] = &["EMail", "Email", "email", "Mail", "WorkEmail"];
const PRINCIPAL_FIELDS: &[&str] = &["UserName", "Name"];

/// Value shown for a reference nothing could resolve
pub fn placeholder(raw: &str) -> String {
    format!("[ID: {}]", raw)
}

/// Counters from one batch, mostly for logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub references: usize,
    pub embedded: usize,
    pub cached: usize,
    pub fetched: usize,
    pub placeholders: usize,
}

struct PendingLookup {
    record: usize,
    display_field: String,
    raw: String,
    embedded: Option<String>,
}

pub struct LookupResolver {
    source: Arc<dyn IdentitySource>,
    lists: ListNames,
    limiter: ConcurrencyLimiter,
    session: Option<Arc<Session>>,
}

impl LookupResolver {
    pub fn new(source: Arc<dyn IdentitySource>, lists: ListNames, limiter: ConcurrencyLimiter) -> Self {
        Self {
            source,
            lists,
            limiter,
            session: None,
        }
    }

    /// Memoize resolved identities in the session cache
    pub fn with_session_cache(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Fill the display field of every lookup reference on `records`.
    ///
    /// Distinct references that need a remote lookup are resolved
    /// concurrently and joined before any field is written. An expired
    /// session aborts the batch with nothing written.
    pub async fn resolve_records(
        &self,
        records: &mut [Record],
        mapping: &FieldMapping,
        employees: &[EmployeeCacheEntry],
    ) -> Result<ResolutionStats, GraphError> {
        let mut stats = ResolutionStats::default();
        let mut pending = Vec::new();

        for (idx, record) in records.iter().enumerate() {
            for (base, raw) in lookup_references(record) {
                stats.references += 1;
                let display_field = mapping.lookup_display_field(&base).to_string();
                let embedded = embedded_identity(record, &base, &raw)
                    .or_else(|| embedded_identity(record, &display_field, &raw));
                pending.push(PendingLookup {
                    record: idx,
                    display_field,
                    raw,
                    embedded,
                });
            }
        }

        let mut resolved: HashMap<String, Option<ResolvedIdentity>> = HashMap::new();
        let mut unresolved = BTreeSet::new();
        for lookup in &pending {
            if lookup.embedded.is_some() || resolved.contains_key(&lookup.raw) {
                continue;
            }
            match self.session.as_ref().and_then(|s| s.identity(&lookup.raw)) {
                Some(identity) => {
                    stats.cached += 1;
                    resolved.insert(lookup.raw.clone(), Some(identity));
                }
                None => {
                    unresolved.insert(lookup.raw.clone());
                }
            }
        }

        let lookups = unresolved.iter().map(|raw| async move {
            let _permit = self.limiter.acquire().await;
            (raw.clone(), self.resolve_reference(raw, employees).await)
        });
        let mut fetched = Vec::new();
        for (raw, identity) in join_all(lookups).await {
            fetched.push((raw, identity?));
        }

        // A mid-batch invalidate cleared the session caches; keep them clear
        let cache = self.session.as_ref().filter(|s| s.is_authenticated());
        for (raw, identity) in fetched {
            stats.fetched += 1;
            if let (Some(session), Some(identity)) = (cache, &identity) {
                session.cache_identity(&raw, identity.clone());
            }
            resolved.insert(raw, identity);
        }

        for lookup in pending {
            let value = match lookup.embedded {
                Some(name) => {
                    stats.embedded += 1;
                    name
                }
                None => match resolved.get(&lookup.raw) {
                    Some(Some(identity)) => identity.display_name.clone(),
                    _ => {
                        stats.placeholders += 1;
                        placeholder(&lookup.raw)
                    }
                },
            };
            records[lookup.record].insert(lookup.display_field, Value::String(value));
        }

        log::debug!("Lookup resolution: {:?}, limiter: {:?}", stats, self.limiter.stats());
        Ok(stats)
    }

    /// Resolve one raw reference. Failures along the way only move on to
    /// the next strategy, except an expired session which is returned.
    pub async fn resolve_reference(
        &self,
        raw: &str,
        employees: &[EmployeeCacheEntry],
    ) -> Result<Option<ResolvedIdentity>, GraphError> {
        let raw = raw.trim();
        let identity = match ReferenceKind::classify(raw) {
            ReferenceKind::Guid => self.resolve_guid(raw, employees).await?,
            ReferenceKind::ItemId => self.resolve_item_id(raw, employees).await?,
            ReferenceKind::Email => self.resolve_email(raw, employees).await?,
            ReferenceKind::Unknown => None,
        };

        if identity.is_none() {
            log::debug!("No identity found for reference '{}'", raw);
        }
        Ok(identity)
    }

    async fn resolve_guid(
        &self,
        raw: &str,
        employees: &[EmployeeCacheEntry],
    ) -> Result<Option<ResolvedIdentity>, GraphError> {
        if let Some(user) = self.directory_user(raw).await? {
            return Ok(Some(user));
        }

        Ok(employees
            .iter()
            .find(|e| e.id.eq_ignore_ascii_case(raw))
            .map(EmployeeCacheEntry::to_identity))
    }

    async fn resolve_item_id(
        &self,
        raw: &str,
        employees: &[EmployeeCacheEntry],
    ) -> Result<Option<ResolvedIdentity>, GraphError> {
        if let Some(fields) = self.list_item(&self.lists.employees, raw).await? {
            if let Some(name) = extract_employee_name(&fields) {
                return Ok(Some(identity_from_fields(raw, name, &fields)));
            }
        }

        if let Some(card) = self.list_item(&self.lists.access_cards, raw).await? {
            if let Some(identity) = self.access_card_employee(raw, &card).await? {
                return Ok(Some(identity));
            }
        }

        if let Some(fields) = self.list_item(&self.lists.user_information, raw).await? {
            let name = field_str(&fields, "Title")
                .map(|t| t.into_owned())
                .or_else(|| first_field(&fields, EMAIL_FIELDS));
            if let Some(name) = name {
                return Ok(Some(identity_from_fields(raw, name, &fields)));
            }
        }

        Ok(employees
            .iter()
            .find(|e| {
                e.emp_id.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(raw))
                    || e.email.as_deref().is_some_and(|m| m.eq_ignore_ascii_case(raw))
                    || e.matches_principal_prefix(raw)
            })
            .map(EmployeeCacheEntry::to_identity))
    }

    /// The employee an access card item is issued to
    async fn access_card_employee(
        &self,
        raw: &str,
        card: &Record,
    ) -> Result<Option<ResolvedIdentity>, GraphError> {
        if let Some(name) = card.get("Employee").and_then(embedded_person_name) {
            return Ok(Some(identity_from_fields(raw, name, card)));
        }

        // Card only carries the raw reference; follow it one hop
        let Some(employee_id) = field_str(card, "EmployeeLookupId") else {
            return Ok(None);
        };
        if !is_positive_integer(&employee_id) || employee_id == raw {
            return Ok(None);
        }
        let Some(fields) = self.list_item(&self.lists.employees, &employee_id).await? else {
            return Ok(None);
        };
        Ok(extract_employee_name(&fields).map(|name| identity_from_fields(&employee_id, name, &fields)))
    }

    async fn resolve_email(
        &self,
        raw: &str,
        employees: &[EmployeeCacheEntry],
    ) -> Result<Option<ResolvedIdentity>, GraphError> {
        let cached = employees
            .iter()
            .find(|e| e.matches_email(raw))
            .or_else(|| employees.iter().find(|e| e.matches_principal_prefix(raw)));
        if let Some(entry) = cached {
            return Ok(Some(entry.to_identity()));
        }

        self.directory_user(raw).await
    }

    async fn directory_user(&self, id_or_upn: &str) -> Result<Option<ResolvedIdentity>, GraphError> {
        match self.source.directory_user(id_or_upn).await {
            Ok(user) => Ok(user.map(|u| u.to_identity())),
            Err(e) if e.is_session_expired() => Err(e),
            Err(e) => {
                log::debug!("Directory lookup for '{}' failed: {}", id_or_upn, e);
                Ok(None)
            }
        }
    }

    async fn list_item(&self, list_name: &str, item_id: &str) -> Result<Option<Record>, GraphError> {
        match self.source.list_item(list_name, item_id).await {
            Ok(item) => Ok(item),
            Err(e) if e.is_session_expired() => Err(e),
            Err(e) => {
                log::debug!("Lookup of item {} in '{}' failed: {}", item_id, list_name, e);
                Ok(None)
            }
        }
    }

    /// Map a directory user id or email to its item id in the User
    /// Information List, the id space person columns expect when written.
    pub async fn resolve_sharepoint_user_id(&self, id_or_email: &str) -> Result<Option<String>, GraphError> {
        let input = strip_claims(id_or_email.trim());
        if input.is_empty() {
            return Ok(None);
        }

        let candidates: Vec<String> = match ReferenceKind::classify(input) {
            ReferenceKind::Guid => {
                let Some(user) = self.source.directory_user(input).await? else {
                    log::debug!("Directory user {} not found", input);
                    return Ok(None);
                };
                [user.mail, user.user_principal_name, user.display_name]
                    .into_iter()
                    .flatten()
                    .collect()
            }
            _ => vec![input.to_string()],
        };

        let items = self
            .source
            .user_information_items(&self.lists.user_information)
            .await?;
        let found = match_user_information_item(&items, &candidates);

        log::debug!(
            "Forward resolution of '{}' over {} user entries: {:?}",
            id_or_email,
            items.len(),
            found
        );
        Ok(found)
    }
}

/// Raw `(base, reference)` pairs for every non-empty `<Field>LookupId`
pub fn lookup_references(record: &Record) -> Vec<(String, String)> {
    record
        .iter()
        .filter_map(|(key, value)| {
            let base = lookup_base_name(key)?;
            let raw = match value {
                Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((base.to_string(), raw))
        })
        .collect()
}

/// Strategy 1: the sibling field is an expanded object carrying the same id
fn embedded_identity(record: &Record, field: &str, raw: &str) -> Option<String> {
    let Value::Object(obj) = record.get(field)? else {
        return None;
    };

    let matches = ["id", "email", "LookupId"].iter().any(|key| match obj.get(*key) {
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case(raw),
        Some(Value::Number(n)) => n.to_string() == raw,
        _ => false,
    });
    if !matches {
        return None;
    }

    ["displayName", "title", "LookupValue", "email"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_field(fields: &Record, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| field_str(fields, k))
        .map(|v| v.into_owned())
}

fn identity_from_fields(id: &str, display_name: String, fields: &Record) -> ResolvedIdentity {
    ResolvedIdentity {
        id: id.to_string(),
        display_name,
        email: first_field(fields, EMAIL_FIELDS),
        job_title: first_field(fields, &["JobTitle", "Position"]),
    }
}

/// Find the User Information List item matching any candidate.
/// Email and principal name matches win over display-name matches.
pub fn match_user_information_item(items: &[Record], candidates: &[String]) -> Option<String> {
    let matches_any = |value: &str| candidates.iter().any(|c| c.eq_ignore_ascii_case(value));

    let by_identity = items.iter().find(|item| {
        EMAIL_FIELDS
            .iter()
            .filter_map(|k| field_str(item, k))
            .any(|v| matches_any(&v))
            || PRINCIPAL_FIELDS
                .iter()
                .filter_map(|k| field_str(item, k))
                .any(|v| matches_any(strip_claims(&v)))
    });

    by_identity
        .or_else(|| {
            items
                .iter()
                .find(|item| field_str(item, "Title").is_some_and(|t| matches_any(&t)))
        })
        .and_then(|item| first_field(item, &["Id", "ID", "id"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::concurrency::ConcurrencyConfig;
    use crate::api::models::{DirectoryUser, TokenInfo};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DIRECTORY_GUID: &str = "0b7f3c1e-2d4a-4f7e-9a61-3c2b1d0e9f88";

    #[derive(Default)]
    struct FakeSource {
        users: HashMap<String, DirectoryUser>,
        items: HashMap<(String, String), Record>,
        user_info: Vec<Record>,
        /// Calls answered with this HTTP status instead of data
        failing: HashMap<String, u16>,
        /// Session dropped when the named call is made
        expires: Option<(String, Arc<Session>)>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSource {
        async fn enter(&self, call: String) -> Result<(), GraphError> {
            self.calls.lock().unwrap().push(call.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some((key, session)) = &self.expires {
                if *key == call {
                    session.invalidate();
                }
            }
            match self.failing.get(&call) {
                Some(401) => Err(GraphError::SessionExpired),
                Some(status) => Err(GraphError::Transport {
                    status: *status,
                    message: "Internal Server Error".to_string(),
                }),
                None => Ok(()),
            }
        }

        fn failing(mut self, call: &str, status: u16) -> Self {
            self.failing.insert(call.to_string(), status);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn with_item(mut self, list: &str, id: &str, fields: Value) -> Self {
            self.items.insert(
                (list.to_string(), id.to_string()),
                fields.as_object().unwrap().clone(),
            );
            self
        }

        fn with_user(mut self, id: &str, name: &str, mail: &str) -> Self {
            self.users.insert(
                id.to_string(),
                DirectoryUser {
                    id: id.to_string(),
                    display_name: Some(name.to_string()),
                    mail: Some(mail.to_string()),
                    user_principal_name: Some(mail.to_string()),
                    job_title: None,
                },
            );
            self
        }
    }

    #[async_trait]
    impl IdentitySource for FakeSource {
        async fn directory_user(&self, id_or_upn: &str) -> Result<Option<DirectoryUser>, GraphError> {
            self.enter(format!("user:{}", id_or_upn)).await?;
            Ok(self.users.get(id_or_upn).cloned())
        }

        async fn list_item(&self, list_name: &str, item_id: &str) -> Result<Option<Record>, GraphError> {
            self.enter(format!("item:{}:{}", list_name, item_id)).await?;
            Ok(self
                .items
                .get(&(list_name.to_string(), item_id.to_string()))
                .cloned())
        }

        async fn user_information_items(&self, list_name: &str) -> Result<Vec<Record>, GraphError> {
            self.enter(format!("userinfo:{}", list_name)).await?;
            Ok(self.user_info.clone())
        }
    }

    fn signed_in() -> Arc<Session> {
        Arc::new(Session::with_token(TokenInfo::new(
            "test-token".to_string(),
            None,
            3600,
        )))
    }

    fn resolver(source: Arc<FakeSource>) -> LookupResolver {
        LookupResolver::new(source, ListNames::default(), ConcurrencyLimiter::default())
    }

    fn asset(id: &str, lookup: Value) -> Record {
        json!({"Id": id, "Title": format!("LAP-{}", id), "field_2LookupId": lookup})
            .as_object()
            .unwrap()
            .clone()
    }

    fn asset_mapping() -> FieldMapping {
        FieldMapping {
            mapping: [("field_2".to_string(), "Assignee".to_string())]
                .into_iter()
                .collect(),
            lookup_fields: vec!["field_2".to_string()],
        }
    }

    #[tokio::test]
    async fn test_mixed_batch_resolves_concurrently() {
        let source = Arc::new(
            FakeSource::default()
                .with_item("Employees", "7", json!({"Id": "7", "Title": "Ana Lopez"}))
                .with_item("Employees", "9", json!({"Id": "9", "Title": "Ravi Menon"}))
                .with_user(DIRECTORY_GUID, "Dana Whitfield", "dana@contoso.com"),
        );
        let resolver = resolver(source.clone());

        let mut records = vec![
            asset("1", json!("7")),
            asset("2", json!(9)),
            asset("3", json!(DIRECTORY_GUID)),
            asset("4", json!("999")),
            asset("5", json!("7")),
        ];

        let stats = resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();

        assert_eq!(records[0]["Assignee"], json!("Ana Lopez"));
        assert_eq!(records[1]["Assignee"], json!("Ravi Menon"));
        assert_eq!(records[2]["Assignee"], json!("Dana Whitfield"));
        assert_eq!(records[3]["Assignee"], json!("[ID: 999]"));
        assert_eq!(records[4]["Assignee"], json!("Ana Lopez"));

        assert_eq!(stats.references, 5);
        assert_eq!(stats.fetched, 4);
        assert_eq!(stats.placeholders, 1);

        // all four distinct references were in flight together
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 4);
        let calls = source.calls();
        assert_eq!(calls.iter().filter(|c| *c == "item:Employees:7").count(), 1);
    }

    #[tokio::test]
    async fn test_guid_never_takes_item_path() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(source.clone());

        let mut records = vec![asset("1", json!(DIRECTORY_GUID))];
        resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();

        assert_eq!(records[0]["Assignee"], json!(format!("[ID: {}]", DIRECTORY_GUID)));
        let calls = source.calls();
        assert_eq!(calls, vec![format!("user:{}", DIRECTORY_GUID)]);
    }

    #[tokio::test]
    async fn test_guid_prefers_directory_over_cache() {
        let source = Arc::new(FakeSource::default().with_user(
            DIRECTORY_GUID,
            "Dana Whitfield",
            "dana@contoso.com",
        ));
        let resolver = resolver(source);
        let employees = vec![EmployeeCacheEntry {
            id: DIRECTORY_GUID.to_string(),
            display_name: Some("Stale Name".to_string()),
            ..Default::default()
        }];

        let identity = resolver
            .resolve_reference(DIRECTORY_GUID, &employees)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.display_name, "Dana Whitfield");
    }

    #[tokio::test]
    async fn test_guid_falls_back_to_cache() {
        let resolver = resolver(Arc::new(FakeSource::default()));
        let employees = vec![EmployeeCacheEntry {
            id: DIRECTORY_GUID.to_uppercase(),
            display_name: Some("Cached Person".to_string()),
            ..Default::default()
        }];

        let identity = resolver
            .resolve_reference(DIRECTORY_GUID, &employees)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.display_name, "Cached Person");
    }

    #[tokio::test]
    async fn test_expanded_sibling_skips_remote_lookup() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(source.clone());
        let mut records = vec![
            json!({
                "Id": "1",
                "field_2LookupId": "12",
                "field_2": {"LookupId": 12, "LookupValue": "Grace Oduya"}
            })
            .as_object()
            .unwrap()
            .clone(),
        ];

        let stats = resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();

        assert_eq!(records[0]["Assignee"], json!("Grace Oduya"));
        assert_eq!(stats.embedded, 1);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_expanded_sibling_with_other_id_is_ignored() {
        let source = Arc::new(
            FakeSource::default()
                .with_item("Employees", "12", json!({"Title": "Grace Oduya"})),
        );
        let resolver = resolver(source);
        let mut records = vec![
            json!({
                "Id": "1",
                "field_2LookupId": "12",
                "field_2": {"id": "40", "displayName": "Someone Else"}
            })
            .as_object()
            .unwrap()
            .clone(),
        ];

        resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();
        assert_eq!(records[0]["Assignee"], json!("Grace Oduya"));
    }

    #[tokio::test]
    async fn test_access_card_embedded_employee() {
        let source = Arc::new(FakeSource::default().with_item(
            "Access Cards",
            "31",
            json!({"Title": "HPH0031", "Employee": {"LookupValue": "Ravi Menon"}, "CardStatus": "Active"}),
        ));
        let resolver = resolver(source);

        let identity = resolver.resolve_reference("31", &[]).await.unwrap().unwrap();
        assert_eq!(identity.display_name, "Ravi Menon");
    }

    #[tokio::test]
    async fn test_access_card_follows_employee_reference() {
        let source = Arc::new(
            FakeSource::default()
                .with_item(
                    "Access Cards",
                    "31",
                    json!({"Title": "HPH0031", "EmployeeLookupId": "7"}),
                )
                .with_item("Employees", "7", json!({"Title": "Ana Lopez"})),
        );
        let resolver = resolver(source);

        let identity = resolver.resolve_reference("31", &[]).await.unwrap().unwrap();
        assert_eq!(identity.display_name, "Ana Lopez");
        assert_eq!(identity.id, "7");
    }

    #[tokio::test]
    async fn test_user_information_list_item() {
        let source = Arc::new(FakeSource::default().with_item(
            "User Information List",
            "15",
            json!({"Title": "Lee Park", "EMail": "lee@contoso.com"}),
        ));
        let resolver = resolver(source);

        let identity = resolver.resolve_reference("15", &[]).await.unwrap().unwrap();
        assert_eq!(identity.display_name, "Lee Park");
        assert_eq!(identity.email.as_deref(), Some("lee@contoso.com"));
    }

    #[tokio::test]
    async fn test_integer_falls_back_to_employee_number() {
        let resolver = resolver(Arc::new(FakeSource::default()));
        let employees = vec![EmployeeCacheEntry {
            id: "abc".to_string(),
            display_name: Some("Maria Santos".to_string()),
            emp_id: Some("4410".to_string()),
            ..Default::default()
        }];

        let identity = resolver.resolve_reference("4410", &employees).await.unwrap().unwrap();
        assert_eq!(identity.display_name, "Maria Santos");
    }

    #[tokio::test]
    async fn test_email_matches_cache_then_directory() {
        let source = Arc::new(FakeSource::default().with_user(
            "lee@contoso.com",
            "Lee Park",
            "lee@contoso.com",
        ));
        let resolver = resolver(source.clone());
        let employees = vec![EmployeeCacheEntry {
            id: "1".to_string(),
            display_name: Some("Maria Santos".to_string()),
            user_principal_name: Some("msantos@contoso.com".to_string()),
            ..Default::default()
        }];

        let cached = resolver
            .resolve_reference("MSANTOS@contoso.com", &employees)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.display_name, "Maria Santos");
        assert!(source.calls().is_empty());

        let remote = resolver
            .resolve_reference("lee@contoso.com", &employees)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote.display_name, "Lee Park");
    }

    #[tokio::test]
    async fn test_unknown_shapes_become_placeholders() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(source.clone());
        let mut records = vec![asset("1", json!("not-an-id")), asset("2", json!("0"))];

        resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();

        assert_eq!(records[0]["Assignee"], json!("[ID: not-an-id]"));
        assert_eq!(records[1]["Assignee"], json!("[ID: 0]"));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_references_are_left_alone() {
        let resolver = resolver(Arc::new(FakeSource::default()));
        let mut records = vec![asset("1", Value::Null), asset("2", json!(""))];

        let stats = resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();

        assert_eq!(stats.references, 0);
        assert!(!records[0].contains_key("Assignee"));
    }

    #[tokio::test]
    async fn test_session_cache_is_used_across_batches() {
        let source = Arc::new(
            FakeSource::default().with_item("Employees", "7", json!({"Title": "Ana Lopez"})),
        );
        let session = signed_in();
        let resolver = resolver(source.clone()).with_session_cache(session.clone());

        let mut first = vec![asset("1", json!("7"))];
        resolver.resolve_records(&mut first, &asset_mapping(), &[]).await.unwrap();
        let mut second = vec![asset("2", json!("7"))];
        let stats = resolver.resolve_records(&mut second, &asset_mapping(), &[]).await.unwrap();

        assert_eq!(second[0]["Assignee"], json!("Ana Lopez"));
        assert_eq!(stats.cached, 1);
        assert_eq!(source.calls().len(), 1);
        assert!(session.identity("7").is_some());
    }

    #[tokio::test]
    async fn test_failed_strategy_falls_through() {
        let source = Arc::new(
            FakeSource::default()
                .with_item("Employees", "7", json!({"Title": "Ana Lopez"}))
                .with_item(
                    "Access Cards",
                    "31",
                    json!({"Title": "HPH0031", "Employee": {"LookupValue": "Ravi Menon"}}),
                )
                .failing("item:Employees:31", 500)
                .failing("item:Employees:44", 500)
                .failing("item:Access Cards:44", 503)
                .failing("item:User Information List:44", 500),
        );
        let resolver = resolver(source.clone());
        let mut records = vec![
            asset("1", json!("7")),
            asset("2", json!("31")),
            asset("3", json!("44")),
        ];

        let stats = resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();

        assert_eq!(records[0]["Assignee"], json!("Ana Lopez"));
        assert_eq!(records[1]["Assignee"], json!("Ravi Menon"));
        assert_eq!(records[2]["Assignee"], json!("[ID: 44]"));
        assert_eq!(stats.placeholders, 1);
        assert!(source.calls().contains(&"item:User Information List:44".to_string()));
    }

    #[tokio::test]
    async fn test_failed_directory_lookup_uses_cache() {
        let source = Arc::new(FakeSource::default().failing(&format!("user:{}", DIRECTORY_GUID), 500));
        let resolver = resolver(source);
        let employees = vec![EmployeeCacheEntry {
            id: DIRECTORY_GUID.to_string(),
            display_name: Some("Cached Person".to_string()),
            ..Default::default()
        }];

        let identity = resolver
            .resolve_reference(DIRECTORY_GUID, &employees)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.display_name, "Cached Person");
    }

    #[tokio::test]
    async fn test_expired_session_aborts_batch() {
        let source = Arc::new(
            FakeSource::default()
                .with_item("Employees", "7", json!({"Title": "Ana Lopez"}))
                .failing("item:Employees:14", 401),
        );
        let resolver = resolver(source.clone());
        let mut records = vec![asset("1", json!("7")), asset("2", json!("14"))];

        let err = resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap_err();

        assert!(err.is_session_expired());
        assert!(!records[0].contains_key("Assignee"));
        assert!(!records[1].contains_key("Assignee"));
        // no further strategies were tried for the expired reference
        assert!(!source.calls().contains(&"item:Access Cards:14".to_string()));
    }

    #[tokio::test]
    async fn test_expired_session_from_reference() {
        let resolver = resolver(Arc::new(
            FakeSource::default().failing("user:lee@contoso.com", 401),
        ));

        let err = resolver
            .resolve_reference("lee@contoso.com", &[])
            .await
            .unwrap_err();
        assert!(err.is_session_expired());
    }

    #[tokio::test]
    async fn test_no_caching_after_mid_batch_invalidate() {
        let session = signed_in();
        let source = Arc::new(FakeSource {
            expires: Some(("item:Employees:9".to_string(), session.clone())),
            ..FakeSource::default()
                .with_item("Employees", "7", json!({"Title": "Ana Lopez"}))
                .with_item("Employees", "9", json!({"Title": "Ravi Menon"}))
        });
        let resolver = resolver(source).with_session_cache(session.clone());
        let mut records = vec![asset("1", json!("7")), asset("2", json!("9"))];

        resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();

        assert_eq!(records[0]["Assignee"], json!("Ana Lopez"));
        assert!(!session.is_authenticated());
        assert!(session.identity("7").is_none());
        assert!(session.identity("9").is_none());
    }

    #[tokio::test]
    async fn test_forward_resolution_by_email() {
        let source = Arc::new(FakeSource {
            user_info: vec![
                json!({"Id": "3", "Title": "Dana Whitfield", "EMail": "Dana@Contoso.com"})
                    .as_object()
                    .unwrap()
                    .clone(),
                json!({"Id": "8", "Title": "Lee Park", "UserName": "i:0#.f|membership|lee@contoso.com"})
                    .as_object()
                    .unwrap()
                    .clone(),
            ],
            ..Default::default()
        });
        let resolver = resolver(source);

        assert_eq!(
            resolver.resolve_sharepoint_user_id("dana@contoso.com").await.unwrap(),
            Some("3".to_string())
        );
        assert_eq!(
            resolver.resolve_sharepoint_user_id("LEE@contoso.com").await.unwrap(),
            Some("8".to_string())
        );
        assert_eq!(
            resolver.resolve_sharepoint_user_id("nobody@contoso.com").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_forward_resolution_from_directory_id() {
        let source = Arc::new(FakeSource {
            user_info: vec![
                json!({"ID": 21, "Title": "Dana Whitfield", "Name": "dana@contoso.com"})
                    .as_object()
                    .unwrap()
                    .clone(),
            ],
            ..Default::default()
        }
        .with_user(DIRECTORY_GUID, "Dana Whitfield", "dana@contoso.com"));
        let resolver = resolver(source.clone());

        let id = resolver
            .resolve_sharepoint_user_id(DIRECTORY_GUID)
            .await
            .unwrap();
        assert_eq!(id, Some("21".to_string()));

        // unknown directory ids stop before scanning the list
        let missing = resolver
            .resolve_sharepoint_user_id("11111111-2222-3333-4444-555555555555")
            .await
            .unwrap();
        assert_eq!(missing, None);
        assert_eq!(
            source.calls().iter().filter(|c| c.starts_with("userinfo:")).count(),
            1
        );
    }

    #[test]
    fn test_identity_match_beats_title_match() {
        let items = vec![
            json!({"Id": "1", "Title": "lee@contoso.com"}).as_object().unwrap().clone(),
            json!({"Id": "2", "Title": "Lee Park", "EMail": "lee@contoso.com"})
                .as_object()
                .unwrap()
                .clone(),
        ];
        let found = match_user_information_item(&items, &["lee@contoso.com".to_string()]);
        assert_eq!(found, Some("2".to_string()));
    }

    #[test]
    fn test_lookup_references() {
        let record = json!({
            "Id": "1",
            "field_2LookupId": 7,
            "EmployeeLookupId": " 12 ",
            "ManagerLookupId": null,
            "LookupId": "3",
            "Title": "x"
        });
        let mut refs = lookup_references(record.as_object().unwrap());
        refs.sort();
        assert_eq!(
            refs,
            vec![
                ("Employee".to_string(), "12".to_string()),
                ("field_2".to_string(), "7".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_limiter_bounds_fan_out() {
        let source = Arc::new(FakeSource::default());
        let limiter = ConcurrencyLimiter::new(ConcurrencyConfig {
            max_concurrent_requests: 1,
            enabled: true,
        });
        let resolver = LookupResolver::new(source.clone(), ListNames::default(), limiter);
        let mut records = vec![
            asset("1", json!(DIRECTORY_GUID)),
            asset("2", json!("11111111-2222-3333-4444-555555555555")),
        ];

        resolver
            .resolve_records(&mut records, &asset_mapping(), &[])
            .await
            .unwrap();

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(source.calls().len(), 2);
    }
}
