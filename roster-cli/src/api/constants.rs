//! Microsoft Graph endpoints and limits

/// Graph v1.0 root
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Authority root; the tenant id is appended
pub const AUTHORITY_BASE_URL: &str = "https://login.microsoftonline.com";

/// Page cap when listing directory users
pub const MAX_USER_PAGES: usize = 50;

/// Page cap when scanning the User Information List
pub const MAX_USER_INFO_PAGES: usize = 10;

/// Page cap when listing items of a regular list
pub const MAX_ITEM_PAGES: usize = 50;

/// Page size requested for list items
pub const ITEM_PAGE_SIZE: usize = 200;

/// Fields requested for directory users
pub const USER_SELECT: &str = "id,displayName,mail,userPrincipalName,jobTitle";

/// Lowercased fragments of a 403 body that point at the token rather than
/// at missing permissions
pub const TOKEN_ERROR_MARKERS: &[&str] = &[
    "invalidauthenticationtoken",
    "invalid_token",
    "token is expired",
    "token has expired",
    "token expired",
    "lifetime validation failed",
    "access token is empty",
];

/// Delegated scopes requested at sign-in
pub const DEFAULT_SCOPES: &[&str] = &[
    "offline_access",
    "User.Read",
    "User.ReadBasic.All",
    "Sites.ReadWrite.All",
];

/// Redirect used when the host can register the custom scheme
pub const CUSTOM_SCHEME_REDIRECT_URI: &str = "roster://auth";

/// Port used for the localhost redirect fallback
pub const DEFAULT_LOCALHOST_PORT: u16 = 8400;
