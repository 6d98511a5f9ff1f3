//! Session context: the access token plus per-session memo caches
//!
//! Everything here is cleared together by [`Session::invalidate`], which is
//! what the client calls when Graph reports the token as expired.

use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::metadata::FieldMapping;
use super::models::{ResolvedIdentity, TokenInfo};

/// Callback invoked once the session has been invalidated
pub type SessionTimeoutCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct Session {
    token: ArcSwapOption<TokenInfo>,
    site_id: Mutex<Option<String>>,
    /// list name (lowercased) -> list id
    list_ids: Mutex<HashMap<String, String>>,
    /// list name (lowercased) -> column mapping
    field_mappings: Mutex<HashMap<String, FieldMapping>>,
    /// raw lookup reference -> resolved identity
    identities: Mutex<HashMap<String, ResolvedIdentity>>,
    on_timeout: Mutex<Option<SessionTimeoutCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cache_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: TokenInfo) -> Self {
        let session = Self::new();
        session.set_token(token);
        session
    }

    pub fn set_token(&self, token: TokenInfo) {
        self.token.store(Some(Arc::new(token)));
    }

    pub fn token(&self) -> Option<Arc<TokenInfo>> {
        self.token.load_full()
    }

    pub fn access_token(&self) -> Option<String> {
        self.token.load_full().map(|t| t.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.load_full().is_some()
    }

    /// Register the callback run after the session expires
    pub fn set_on_session_timeout(&self, callback: SessionTimeoutCallback) {
        *lock(&self.on_timeout) = Some(callback);
    }

    /// Drop the token and every cache, then notify the registered callback
    pub fn invalidate(&self) {
        let had_token = self.token.swap(None).is_some();
        self.clear_caches();

        log::warn!("Session invalidated (token was {})", if had_token { "set" } else { "absent" });

        let callback = lock(&self.on_timeout).clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn clear_caches(&self) {
        *lock(&self.site_id) = None;
        lock(&self.list_ids).clear();
        lock(&self.field_mappings).clear();
        lock(&self.identities).clear();
    }

    pub fn site_id(&self) -> Option<String> {
        lock(&self.site_id).clone()
    }

    pub fn cache_site_id(&self, site_id: &str) {
        *lock(&self.site_id) = Some(site_id.to_string());
    }

    pub fn list_id(&self, list_name: &str) -> Option<String> {
        lock(&self.list_ids).get(&cache_key(list_name)).cloned()
    }

    pub fn cache_list_id(&self, list_name: &str, list_id: &str) {
        lock(&self.list_ids).insert(cache_key(list_name), list_id.to_string());
    }

    pub fn field_mapping(&self, list_name: &str) -> Option<FieldMapping> {
        lock(&self.field_mappings).get(&cache_key(list_name)).cloned()
    }

    pub fn cache_field_mapping(&self, list_name: &str, mapping: FieldMapping) {
        lock(&self.field_mappings).insert(cache_key(list_name), mapping);
    }

    pub fn identity(&self, reference: &str) -> Option<ResolvedIdentity> {
        lock(&self.identities).get(reference).cloned()
    }

    pub fn cache_identity(&self, reference: &str, identity: ResolvedIdentity) {
        lock(&self.identities).insert(reference.to_string(), identity);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .field("site_id", &self.site_id())
            .field("cached_lists", &lock(&self.list_ids).len())
            .field("cached_identities", &lock(&self.identities).len())
            .finish()
    }
}
