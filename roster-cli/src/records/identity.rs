//! Identity helpers: reference classification, the employee cache and the
//! free-text name heuristic
//!
//! `extract_employee_name` is a best-effort heuristic over arbitrary list
//! item fields. It is not an authoritative parse and can misclassify real
//! names (e.g. very short ones); its rules are kept stable and tabulated in
//! [`NAME_FIELD_SKIP_TOKENS`] so they can be tested deterministically.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::models::{DirectoryUser, Record, ResolvedIdentity, field_str};

static GUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("GUID pattern is valid")
});

static BADGE_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^HPH\d+$").expect("badge pattern is valid"));

/// Field holding the organization's employee number
pub const EMPLOYEE_ID_FIELD: &str = "EmpID";

/// Field names (lowercased substring match) never treated as a person's name
pub const NAME_FIELD_SKIP_TOKENS: &[&str] = &[
    "cardstatus",
    "status",
    "empid",
    "lookupid",
    "odata",
    "etag",
    "contenttype",
    "modified",
    "created",
    "version",
    "attachments",
    "edit",
    "linktitle",
    "type",
    "number",
    "code",
];

/// A name-shaped value must be strictly longer than this
pub const MIN_NAME_LENGTH: usize = 8;
/// ... and strictly shorter than this
pub const MAX_NAME_LENGTH: usize = 60;

/// Prefix SharePoint puts in front of principal names in claims form
const CLAIMS_PREFIX: &str = "i:0#.f|membership|";

/// Kind of raw value found in a `<Field>LookupId`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Directory object id
    Guid,
    /// List item id
    ItemId,
    /// Email or principal name
    Email,
    Unknown,
}

impl ReferenceKind {
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if is_guid(raw) {
            ReferenceKind::Guid
        } else if is_positive_integer(raw) {
            ReferenceKind::ItemId
        } else if raw.contains('@') {
            ReferenceKind::Email
        } else {
            ReferenceKind::Unknown
        }
    }
}

/// `8-4-4-4-12` hexadecimal
pub fn is_guid(raw: &str) -> bool {
    GUID_PATTERN.is_match(raw)
}

pub fn is_positive_integer(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) && raw.parse::<u64>().is_ok_and(|n| n > 0)
}

/// Strip the claims prefix from a SharePoint principal name
pub fn strip_claims(name: &str) -> &str {
    name.rsplit_once('|')
        .filter(|_| name.starts_with("i:0") || name.starts_with(CLAIMS_PREFIX))
        .map(|(_, rest)| rest)
        .unwrap_or(name)
}

/// Part of a principal name before the `@`
pub fn principal_prefix(upn: &str) -> &str {
    upn.split_once('@').map(|(prefix, _)| prefix).unwrap_or(upn)
}

/// An employee known to the caller, usually loaded with the Employees screen
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeCacheEntry {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub emp_id: Option<String>,
}

impl EmployeeCacheEntry {
    pub fn from_directory_user(user: &DirectoryUser) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            email: user.mail.clone(),
            user_principal_name: user.user_principal_name.clone(),
            job_title: user.job_title.clone(),
            emp_id: None,
        }
    }

    /// Build an entry from an Employees list item
    pub fn from_employee_record(record: &Record) -> Option<Self> {
        let id = field_str(record, "Id")?.into_owned();
        let email = ["Email", "EMail", "WorkEmail", "Mail"]
            .iter()
            .find_map(|k| field_str(record, k))
            .map(|e| e.into_owned());

        Some(Self {
            id,
            display_name: extract_employee_name(record),
            email,
            user_principal_name: field_str(record, "UserPrincipalName").map(|u| u.into_owned()),
            job_title: ["JobTitle", "Position"]
                .iter()
                .find_map(|k| field_str(record, k))
                .map(|j| j.into_owned()),
            emp_id: field_str(record, EMPLOYEE_ID_FIELD).map(|e| e.into_owned()),
        })
    }

    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .or(self.user_principal_name.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn to_identity(&self) -> ResolvedIdentity {
        ResolvedIdentity {
            id: self.id.clone(),
            display_name: self.name().to_string(),
            email: self
                .email
                .clone()
                .or_else(|| self.user_principal_name.clone()),
            job_title: self.job_title.clone(),
        }
    }

    pub fn matches_email(&self, email: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(email))
            || self
                .user_principal_name
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(email))
    }

    /// `raw` equals the part before `@` of the email or principal name
    pub fn matches_principal_prefix(&self, raw: &str) -> bool {
        let raw = principal_prefix(raw);
        [self.user_principal_name.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .any(|u| u.contains('@') && principal_prefix(u).eq_ignore_ascii_case(raw))
    }
}

/// Best-effort display name for a raw Employees (or similar) list item
pub fn extract_employee_name(fields: &Record) -> Option<String> {
    if let Some(title) = field_str(fields, "Title") {
        let emp_id = field_str(fields, EMPLOYEE_ID_FIELD);
        let is_emp_id = emp_id.is_some_and(|id| id.eq_ignore_ascii_case(&title));
        if !BADGE_CODE_PATTERN.is_match(&title) && !is_emp_id {
            return Some(title.into_owned());
        }
    }

    if let Some(name) = fields.get("Employee").and_then(embedded_person_name) {
        return Some(name);
    }

    fields.iter().find_map(|(key, value)| {
        let value = value.as_str()?.trim();
        (!is_skipped_name_field(key) && is_name_shaped(value)).then(|| value.to_string())
    })
}

/// Name carried by an embedded person value (string or expanded object)
pub fn embedded_person_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(obj) => ["displayName", "LookupValue", "title", "Title", "email", "Email"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        Value::Array(items) => items.iter().find_map(embedded_person_name),
        _ => None,
    }
}

/// Skip tokens match anywhere in the name; `id` only as the whole name or
/// its suffix (`ID`, `UserId`), so `MiddleName` or `Residence` still count
pub fn is_skipped_name_field(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.ends_with("id") || NAME_FIELD_SKIP_TOKENS.iter().any(|token| lower.contains(token))
}

/// Letters plus name punctuation, at least one space, within length bounds
pub fn is_name_shaped(value: &str) -> bool {
    let len = value.chars().count();
    len > MIN_NAME_LENGTH
        && len < MAX_NAME_LENGTH
        && value.contains(' ')
        && value
            .chars()
            .all(|c| c.is_alphabetic() || matches!(c, ' ' | '-' | '\'' | '.'))
}
