//! Error types for Microsoft Graph calls

use std::fmt;

/// Errors surfaced by the Graph client and the layers built on it
#[derive(Debug)]
pub enum GraphError {
    /// The access token is missing, expired or was rejected.
    /// Callers must route this to a re-authentication prompt instead of
    /// showing it as a regular failure.
    SessionExpired,
    /// A list, column or item does not exist
    NotFound {
        /// What was being looked up (e.g. "list 'Assets'")
        what: String,
        /// Names that do exist, when known
        available: Vec<String>,
    },
    /// A reference could not be mapped to an identity
    ResolutionFailure { reference: String },
    /// Non-success HTTP status not covered by the variants above
    Transport { status: u16, message: String },
    /// The request never produced a response
    Http(reqwest::Error),
    /// The response body was not the JSON we expected
    Parse(String),
}

impl GraphError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GraphError::NotFound {
            what: what.into(),
            available: Vec::new(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, GraphError::SessionExpired)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound { .. })
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::SessionExpired => {
                write!(f, "Session expired - sign in again with 'roster-cli auth login'")
            }
            GraphError::NotFound { what, available } => {
                if available.is_empty() {
                    write!(f, "{} not found", what)
                } else {
                    write!(f, "{} not found. Available: {}", what, available.join(", "))
                }
            }
            GraphError::ResolutionFailure { reference } => {
                write!(f, "Could not resolve '{}' to a SharePoint user", reference)
            }
            GraphError::Transport { status, message } => {
                write!(f, "Request failed with status {}: {}", status, message)
            }
            GraphError::Http(e) => write!(f, "HTTP request failed: {}", e),
            GraphError::Parse(msg) => write!(f, "Failed to parse response: {}", msg),
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GraphError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        GraphError::Http(e)
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Parse(e.to_string())
    }
}
