//! Configuration: `config.toml` in the user config directory, `.env` and
//! `ROSTER_*` environment overrides

pub mod token_store;

pub use token_store::TokenStore;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::api::client::SiteLocation;
use crate::api::concurrency::{ConcurrencyConfig, DEFAULT_MAX_CONCURRENT_REQUESTS};
use crate::api::constants::{
    CUSTOM_SCHEME_REDIRECT_URI, DEFAULT_LOCALHOST_PORT, DEFAULT_SCOPES, GRAPH_BASE_URL,
};

const APP_DIR: &str = "roster-cli";

/// `~/.config/roster-cli` (or the platform equivalent)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn token_path() -> PathBuf {
    config_dir().join("token.json")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub auth: AuthSettings,
    pub site: SiteSettings,
    pub lists: ListNames,
    /// Per list: which lookup column holds the assignee and which status mirrors it
    pub assignment: BTreeMap<String, AssignmentSettings>,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Use `http://localhost:<port>/auth` instead of the custom scheme
    pub use_localhost_redirect: bool,
    pub localhost_port: u16,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            use_localhost_redirect: false,
            localhost_port: DEFAULT_LOCALHOST_PORT,
        }
    }
}

impl AuthSettings {
    pub fn redirect_uri(&self) -> String {
        if self.use_localhost_redirect {
            format!("http://localhost:{}/auth", self.localhost_port)
        } else {
            CUSTOM_SCHEME_REDIRECT_URI.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteSettings {
    /// e.g. `contoso.sharepoint.com`
    pub host: String,
    /// e.g. `/sites/IT`
    pub path: String,
    /// Graph site id; takes precedence over host/path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

impl SiteSettings {
    pub fn location(&self) -> Result<SiteLocation> {
        if let Some(id) = self.site_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Ok(SiteLocation::Id(id.trim().to_string()));
        }
        if self.host.trim().is_empty() {
            anyhow::bail!(
                "No SharePoint site configured. Set [site] host/path in {} or ROSTER_SITE_HOST.",
                config_path().display()
            );
        }
        Ok(SiteLocation::Path {
            host: self.host.trim().to_string(),
            path: self.path.trim().to_string(),
        })
    }
}

/// Names of the lists the application works with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListNames {
    pub employees: String,
    pub assets: String,
    pub access_cards: String,
    pub user_information: String,
}

impl Default for ListNames {
    fn default() -> Self {
        Self {
            employees: "Employees".to_string(),
            assets: "Assets".to_string(),
            access_cards: "Access Cards".to_string(),
            user_information: "User Information List".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssignmentSettings {
    /// Internal name of the lookup column, without `LookupId`
    pub lookup_field: String,
    pub status_field: String,
    pub assigned_value: String,
    pub available_value: String,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            lookup_field: String::new(),
            status_field: "Status".to_string(),
            assigned_value: "Assigned".to_string(),
            available_value: "Available".to_string(),
        }
    }
}

impl AssignmentSettings {
    pub fn new(lookup_field: &str, status_field: &str) -> Self {
        Self {
            lookup_field: lookup_field.to_string(),
            status_field: status_field.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiSettings {
    pub graph_base_url: String,
    pub max_concurrent_requests: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            graph_base_url: GRAPH_BASE_URL.to_string(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl ApiSettings {
    pub fn concurrency(&self) -> ConcurrencyConfig {
        ConcurrencyConfig {
            max_concurrent_requests: self.max_concurrent_requests,
            enabled: self.max_concurrent_requests > 0,
        }
    }
}

impl Config {
    /// Config with the default assignment columns filled in
    pub fn with_defaults() -> Self {
        let mut config = Self::default();
        config.fill_default_assignments();
        config
    }

    fn fill_default_assignments(&mut self) {
        let defaults = [
            (self.lists.assets.clone(), AssignmentSettings::new("field_2", "Status")),
            (
                self.lists.access_cards.clone(),
                AssignmentSettings::new("Employee", "CardStatus"),
            ),
        ];
        for (list, settings) in defaults {
            if self.assignment_for(&list).is_none() {
                self.assignment.insert(list, settings);
            }
        }
    }

    /// Load from the default location, then `.env` and the environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }

        let mut config = Self::load_from(&config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.fill_default_assignments();
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("ROSTER_TENANT_ID") {
            self.auth.tenant_id = v;
        }
        if let Some(v) = var("ROSTER_CLIENT_ID") {
            self.auth.client_id = v;
        }
        if let Some(v) = var("ROSTER_SITE_HOST") {
            self.site.host = v;
        }
        if let Some(v) = var("ROSTER_SITE_PATH") {
            self.site.path = v;
        }
        if let Some(v) = var("ROSTER_SITE_ID") {
            self.site.site_id = Some(v);
        }
        if let Some(v) = var("ROSTER_GRAPH_URL") {
            self.api.graph_base_url = v;
        }
        if let Some(v) = var("ROSTER_LOCALHOST_REDIRECT") {
            self.auth.use_localhost_redirect = matches!(v.trim(), "1" | "true" | "yes");
        }
    }

    pub fn assignment_for(&self, list_name: &str) -> Option<&AssignmentSettings> {
        self.assignment
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(list_name.trim()))
            .map(|(_, settings)| settings)
    }

    /// Tenant and client id are required before signing in
    pub fn ensure_auth(&self) -> Result<()> {
        if self.auth.tenant_id.trim().is_empty() || self.auth.client_id.trim().is_empty() {
            anyhow::bail!(
                "Tenant and client id are not configured. Set [auth] in {} or ROSTER_TENANT_ID/ROSTER_CLIENT_ID.",
                config_path().display()
            );
        }
        Ok(())
    }
}
