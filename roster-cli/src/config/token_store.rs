//! Persisted OAuth token

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::api::models::TokenInfo;

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<TokenInfo>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file: {}", self.path.display()))?;
        let token = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse token file: {}", self.path.display()))?;
        Ok(Some(token))
    }

    pub fn save(&self, token: &TokenInfo) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(token).context("Failed to serialize token")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write token file: {}", self.path.display()))
    }

    /// Remove the stored token; a missing file is not an error
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove token file: {}", self.path.display())),
        }
    }
}
