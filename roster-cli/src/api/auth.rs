//! OAuth2 authorization code flow with PKCE against Microsoft identity platform

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::constants::AUTHORITY_BASE_URL;
use super::models::TokenInfo;

const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const VERIFIER_LENGTH: usize = 64;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Authority root, overridable for sovereign clouds and tests
    pub authority: String,
}

impl AuthConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            authority: AUTHORITY_BASE_URL.to_string(),
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{}",
            self.authority.trim_end_matches('/'),
            self.tenant_id,
            name
        )
    }

    pub fn authorize_endpoint(&self) -> String {
        self.endpoint("authorize")
    }

    pub fn token_endpoint(&self) -> String {
        self.endpoint("token")
    }

    fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let verifier: String = (0..VERIFIER_LENGTH)
            .map(|_| VERIFIER_CHARSET[rng.random_range(0..VERIFIER_CHARSET.len())] as char)
            .collect();
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Everything needed to send the user to the sign-in page and verify the redirect
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub pkce: PkceChallenge,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct AuthManager {
    config: AuthConfig,
    http: reqwest::Client,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn authorization_request(&self) -> AuthorizationRequest {
        let pkce = PkceChallenge::generate();
        let state = uuid::Uuid::new_v4().to_string();
        let scope = self.config.scope();

        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_mode", "query"),
            ("scope", scope.as_str()),
            ("state", state.as_str()),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        AuthorizationRequest {
            url: format!("{}?{}", self.config.authorize_endpoint(), query),
            state,
            pkce,
        }
    }

    pub async fn exchange_code(&self, code: &str, pkce: &PkceChallenge) -> Result<TokenInfo> {
        let scope = self.config.scope();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
            ("scope", scope.as_str()),
        ];
        self.request_token(&form).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenInfo> {
        let scope = self.config.scope();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        self.request_token(&form).await
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenInfo> {
        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(form)
            .send()
            .await
            .context("Failed to reach the token endpoint")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read token response")?;

        if !status.is_success() {
            let detail = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(description) => format!("{}: {}", e.error, description),
                    None => e.error,
                })
                .unwrap_or(body);
            anyhow::bail!("Token request failed ({}): {}", status, detail);
        }

        let token: TokenResponse =
            serde_json::from_str(&body).context("Failed to parse token response")?;
        log::debug!("Obtained access token valid for {}s", token.expires_in);

        Ok(TokenInfo::new(
            token.access_token,
            token.refresh_token,
            token.expires_in,
        ))
    }
}

/// Extract the authorization code from the redirect URL (or its path+query)
pub fn parse_redirect(redirect: &str, expected_state: &str) -> Result<String> {
    let params = parse_query(redirect);

    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(String::as_str)
            .unwrap_or("no description");
        anyhow::bail!("Sign-in failed: {} ({})", error, description);
    }

    match params.get("state") {
        Some(state) if state == expected_state => {}
        Some(_) => anyhow::bail!("Sign-in response state does not match the request"),
        None => anyhow::bail!("Sign-in response is missing the state parameter"),
    }

    params
        .get("code")
        .filter(|c| !c.is_empty())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Sign-in response does not contain an authorization code"))
}

fn parse_query(url: &str) -> HashMap<String, String> {
    let query = url
        .split_once('?')
        .map(|(_, q)| q)
        .unwrap_or(url)
        .split('#')
        .next()
        .unwrap_or_default();

    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let value = value.replace('+', " ");
            let value = urlencoding::decode(&value).ok()?.into_owned();
            Some((key.to_string(), value))
        })
        .collect()
}

/// Accept one browser redirect on the localhost fallback URI and return its
/// request target (path and query)
pub async fn wait_for_localhost_redirect(listener: TcpListener) -> Result<String> {
    let (mut stream, peer) = listener
        .accept()
        .await
        .context("Failed to accept the sign-in redirect")?;
    log::debug!("Redirect connection from {}", peer);

    let mut buf = vec![0u8; 8192];
    let mut read = 0;
    loop {
        let n = stream.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
        if read == buf.len() || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let request = String::from_utf8_lossy(&buf[..read]);
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| anyhow::anyhow!("Malformed redirect request"))?
        .to_string();

    let body = "Signed in. You can close this window and return to the terminal.";
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await.ok();

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpStream;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(authority: &str) -> AuthConfig {
        let mut config = AuthConfig::new(
            "tenant-1",
            "client-1",
            "roster://auth",
            vec!["offline_access".to_string(), "User.Read".to_string()],
        );
        config.authority = authority.to_string();
        config
    }

    #[test]
    fn test_pkce_challenge_matches_rfc_example() {
        let pkce =
            PkceChallenge::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_generated_verifier_uses_unreserved_chars() {
        let pkce = PkceChallenge::generate();
        assert_eq!(pkce.verifier.len(), VERIFIER_LENGTH);
        assert!(pkce.verifier.bytes().all(|b| VERIFIER_CHARSET.contains(&b)));
    }

    #[test]
    fn test_authorization_url() {
        let manager = AuthManager::new(config("https://login.example")).unwrap();
        let request = manager.authorization_request();

        assert!(request
            .url
            .starts_with("https://login.example/tenant-1/oauth2/v2.0/authorize?"));
        assert!(request.url.contains("redirect_uri=roster%3A%2F%2Fauth"));
        assert!(request.url.contains("scope=offline_access%20User.Read"));
        assert!(request.url.contains("code_challenge_method=S256"));
        assert!(request
            .url
            .contains(&format!("code_challenge={}", request.pkce.challenge)));
        assert!(request.url.contains(&format!("state={}", request.state)));
    }

    #[test]
    fn test_parse_redirect() {
        let code = parse_redirect("roster://auth?code=abc%2F123&state=s1", "s1").unwrap();
        assert_eq!(code, "abc/123");

        let code = parse_redirect("/auth?state=s1&code=xyz", "s1").unwrap();
        assert_eq!(code, "xyz");
    }

    #[test]
    fn test_parse_redirect_rejects_state_mismatch() {
        let err = parse_redirect("roster://auth?code=abc&state=other", "s1").unwrap_err();
        assert!(err.to_string().contains("state"));
    }

    #[test]
    fn test_parse_redirect_surfaces_errors() {
        let err = parse_redirect(
            "roster://auth?error=access_denied&error_description=User+cancelled&state=s1",
            "s1",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Sign-in failed: access_denied (User cancelled)"
        );
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        let manager = AuthManager::new(config(&server.uri())).unwrap();
        let pkce = PkceChallenge::from_verifier("verifier-1".to_string());

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("code_verifier=verifier-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = manager.exchange_code("the-code", &pkce).await.unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.refresh_token.as_deref(), Some("rt"));
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_failure_reports_description() {
        let server = MockServer::start().await;
        let manager = AuthManager::new(config(&server.uri())).unwrap();

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70008: The refresh token has expired."
            })))
            .mount(&server)
            .await;

        let err = manager.refresh("old").await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant: AADSTS70008"));
    }

    #[tokio::test]
    async fn test_localhost_redirect_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(wait_for_localhost_redirect(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /auth?code=c1&state=s1 HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        let target = waiter.await.unwrap().unwrap();
        assert_eq!(target, "/auth?code=c1&state=s1");
        assert_eq!(parse_redirect(&target, "s1").unwrap(), "c1");
    }
}
