//! Data models shared by the Graph client and the record layers

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A list item's fields, keyed by internal or display column name
pub type Record = Map<String, Value>;

/// OAuth token held by the session and persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenInfo {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenInfo {
    /// Build a token from an `expires_in` value in seconds
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        }
    }

    /// Expired, or close enough to expiry that a request would likely fail
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now() + Duration::seconds(60)
    }
}

/// A user from the organization directory (`/users`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

impl DirectoryUser {
    /// Primary email, falling back to the principal name
    pub fn email(&self) -> Option<&str> {
        self.mail
            .as_deref()
            .or(self.user_principal_name.as_deref())
    }

    pub fn to_identity(&self) -> ResolvedIdentity {
        let display_name = self
            .display_name
            .clone()
            .or_else(|| self.email().map(str::to_string))
            .unwrap_or_else(|| self.id.clone());

        ResolvedIdentity {
            id: self.id.clone(),
            display_name,
            email: self.email().map(str::to_string),
            job_title: self.job_title.clone(),
        }
    }
}

/// A directory role the signed-in user is a member of
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRole {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A SharePoint list on the configured site
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ListInfo {
    /// Name shown to users, falling back to the URL name
    pub fn title(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn matches(&self, list_name: &str) -> bool {
        let wanted = list_name.trim();
        self.display_name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(wanted))
            || self
                .name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(wanted))
    }
}

/// Canonical shape of any person or lookup reference once resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
}

/// Read a field as a non-empty trimmed string; numbers are rendered
pub fn field_str<'a>(record: &'a Record, key: &str) -> Option<std::borrow::Cow<'a, str>> {
    match record.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(std::borrow::Cow::Borrowed(s.trim())),
        Value::Number(n) => Some(std::borrow::Cow::Owned(n.to_string())),
        _ => None,
    }
}
