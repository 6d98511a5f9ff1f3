//! Builds the configured client stack for a command

use anyhow::{Context, Result};
use std::sync::Arc;

use roster_cli::api::auth::{AuthConfig, AuthManager};
use roster_cli::api::client::GraphClient;
use roster_cli::api::models::TokenInfo;
use roster_cli::api::session::Session;
use roster_cli::config::{self, Config, TokenStore};
use roster_cli::records::{EmployeeCacheEntry, RosterService};

/// Lifetime assumed for a token passed through `ROSTER_ACCESS_TOKEN`
const ENV_TOKEN_LIFETIME_SECS: i64 = 3600;

pub struct AppContext {
    pub config: Config,
    pub token_store: TokenStore,
}

impl AppContext {
    pub fn load() -> Result<Self> {
        let config = Config::load()?;
        Ok(Self {
            config,
            token_store: TokenStore::new(config::token_path()),
        })
    }

    pub fn auth_manager(&self) -> Result<AuthManager> {
        self.config.ensure_auth()?;
        let auth = &self.config.auth;
        AuthManager::new(AuthConfig::new(
            auth.tenant_id.trim(),
            auth.client_id.trim(),
            auth.redirect_uri(),
            auth.scopes.clone(),
        ))
    }

    /// A usable token: from the environment, or the stored one refreshed
    /// when it has expired
    pub async fn token(&self) -> Result<TokenInfo> {
        if let Some(token) = std::env::var("ROSTER_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
        {
            log::debug!("Using access token from ROSTER_ACCESS_TOKEN");
            return Ok(TokenInfo::new(
                token.trim().to_string(),
                None,
                ENV_TOKEN_LIFETIME_SECS,
            ));
        }

        let stored = self
            .token_store
            .load()?
            .ok_or_else(|| anyhow::anyhow!("Not signed in. Run 'roster-cli auth login' first."))?;
        if !stored.is_expired() {
            return Ok(stored);
        }

        let refresh_token = stored.refresh_token.clone().ok_or_else(|| {
            anyhow::anyhow!("Stored token has expired. Run 'roster-cli auth login' again.")
        })?;

        log::info!("Access token expired, refreshing");
        let mut token = self
            .auth_manager()?
            .refresh(&refresh_token)
            .await
            .context("Failed to refresh the session. Run 'roster-cli auth login' again.")?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token);
        }
        self.token_store.save(&token)?;
        Ok(token)
    }

    /// Session whose expiry also removes the stored token
    pub async fn session(&self) -> Result<Arc<Session>> {
        let session = Arc::new(Session::with_token(self.token().await?));

        let store = self.token_store.clone();
        session.set_on_session_timeout(Arc::new(move || {
            log::warn!("Session expired, removing stored token");
            if let Err(e) = store.clear() {
                log::warn!("Could not remove stored token: {:#}", e);
            }
        }));
        Ok(session)
    }

    pub async fn client(&self) -> Result<GraphClient> {
        let session = self.session().await?;
        let site = self.config.site.location()?;
        GraphClient::new(self.config.api.graph_base_url.clone(), site, session)
            .context("Failed to create Graph client")
    }

    pub async fn service(&self) -> Result<RosterService> {
        Ok(RosterService::new(self.client().await?, &self.config))
    }
}

/// Employee cache for lookup resolution; an unreadable Employees list only
/// costs resolution quality
pub async fn employee_cache(service: &RosterService, with_directory: bool) -> Vec<EmployeeCacheEntry> {
    match service.load_employee_cache(with_directory).await {
        Ok(entries) => entries,
        Err(e) if e.is_session_expired() => {
            log::debug!("Skipping employee cache: {}", e);
            Vec::new()
        }
        Err(e) => {
            log::warn!("Could not load the employee cache: {}", e);
            Vec::new()
        }
    }
}
