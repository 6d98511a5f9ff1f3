//! Microsoft Graph access: authentication, session state and the HTTP client

pub mod auth;
pub mod client;
pub mod concurrency;
pub mod constants;
pub mod error;
pub mod metadata;
pub mod models;
pub mod operations;
pub mod session;

pub use auth::{AuthConfig, AuthManager};
pub use client::{GraphClient, SiteLocation};
pub use concurrency::{ConcurrencyConfig, ConcurrencyLimiter};
pub use error::GraphError;
pub use metadata::FieldMapping;
pub use models::{Record, ResolvedIdentity, TokenInfo};
pub use operations::{ItemOperation, OperationResult};
pub use session::{Session, SessionTimeoutCallback};
