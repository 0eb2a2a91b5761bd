//! Azure AD bearer tokens for the completion endpoint.
//!
//! A [`Credential`] knows how to obtain a fresh token for a scope; the
//! [`BearerTokenProvider`] wraps one and caches what it returns until the
//! token gets close to expiry. [`default_credential`] picks a credential from
//! the environment the way Azure's default chain does: an explicit token,
//! then a service principal secret, then the Azure CLI login.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::CredentialConfig;

/// Scope for Azure OpenAI data-plane calls
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Refresh tokens this long before they expire
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Lifetime assumed when the issuer does not say
const DEFAULT_TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to execute {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("Token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
    #[error("Credential returned an empty token")]
    Empty,
}

/// A bearer token and the moment it stops being valid
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Result<Self, AuthError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AuthError::Empty);
        }
        Ok(Self { token, expires_at })
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Source of fresh tokens
#[async_trait]
pub trait Credential: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError>;
}

/// Hands out a bearer token for the completion service
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}

// ============================================================================
// Static token
// ============================================================================

/// A pre-issued token, used as-is and never refreshed
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Credential for StaticToken {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn get_token(&self, _scope: &str) -> Result<AccessToken, AuthError> {
        AccessToken::new(self.token.clone(), DateTime::<Utc>::MAX_UTC)
    }
}

// ============================================================================
// Azure CLI
// ============================================================================

/// Borrows the signed-in Azure CLI session (`az account get-access-token`)
pub struct AzureCliCredential {
    program: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    /// Epoch seconds; only emitted by newer CLI versions
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self::with_program("az")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn parse_output(stdout: &[u8], now: DateTime<Utc>) -> Result<AccessToken, AuthError> {
        let parsed: CliTokenResponse = serde_json::from_slice(stdout)
            .map_err(|e| AuthError::InvalidResponse(format!("az output: {e}")))?;

        let expires_at = parsed
            .expires_on
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| now + ChronoDuration::seconds(DEFAULT_TOKEN_TTL_SECS));

        AccessToken::new(parsed.access_token, expires_at)
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Credential for AzureCliCredential {
    fn name(&self) -> &'static str {
        "azure_cli"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        tracing::debug!(program = %self.program, scope, "Fetching token from Azure CLI");

        let output = Command::new(&self.program)
            .args([
                "account",
                "get-access-token",
                "--scope",
                scope,
                "--output",
                "json",
            ])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AuthError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(AuthError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Self::parse_output(&output.stdout, Utc::now())
    }
}

// ============================================================================
// Service principal (client credentials grant)
// ============================================================================

/// Service principal login against the Microsoft identity platform
pub struct ClientSecretCredential {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl ClientSecretCredential {
    pub fn new(
        client: reqwest::Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority_host.trim_end_matches('/'),
            tenant_id
        );
        Self {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl Credential for ClientSecretCredential {
    fn name(&self) -> &'static str {
        "client_secret"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        tracing::debug!(url = %self.token_url, scope, "Requesting client credentials token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];

        let response = self.client.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<OAuthErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {description}", err.error),
                    None => err.error,
                },
                Err(_) => body,
            };
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: OAuthTokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("token endpoint: {e}")))?;
        let lifetime = parsed.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        AccessToken::new(parsed.access_token, expiry_after(Utc::now(), lifetime)?)
    }
}

/// `now + lifetime`, rejecting lifetimes that are negative or out of range
fn expiry_after(now: DateTime<Utc>, lifetime_secs: i64) -> Result<DateTime<Utc>, AuthError> {
    if lifetime_secs < 0 {
        return Err(AuthError::InvalidResponse(format!("negative expires_in: {lifetime_secs}")));
    }
    ChronoDuration::try_seconds(lifetime_secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            AuthError::InvalidResponse(format!("expires_in out of range: {lifetime_secs}"))
        })
}

// ============================================================================
// Selection and caching
// ============================================================================

/// Pick a credential from configuration: static token, then service
/// principal, then Azure CLI.
pub fn default_credential(
    config: &CredentialConfig,
    client: reqwest::Client,
) -> Box<dyn Credential> {
    if let Some(token) = &config.static_token {
        return Box::new(StaticToken::new(token.clone()));
    }

    if let Some(sp) = &config.client_secret {
        return Box::new(ClientSecretCredential::new(
            client,
            &config.authority_host,
            &sp.tenant_id,
            sp.client_id.clone(),
            sp.client_secret.clone(),
        ));
    }

    Box::new(AzureCliCredential::new())
}

/// Caches the token of one credential for one scope
pub struct BearerTokenProvider {
    credential: Box<dyn Credential>,
    scope: String,
    cache: Mutex<Option<AccessToken>>,
}

impl BearerTokenProvider {
    pub fn new(credential: Box<dyn Credential>, scope: impl Into<String>) -> Self {
        Self {
            credential,
            scope: scope.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn credential_name(&self) -> &'static str {
        self.credential.name()
    }
}

#[async_trait]
impl TokenProvider for BearerTokenProvider {
    async fn token(&self) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.credential.get_token(&self.scope).await?;
        tracing::debug!(
            credential = self.credential.name(),
            expires_at = %fresh.expires_at,
            "Acquired bearer token"
        );
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSecretConfig;
    use axum::{extract::Path, routing::post, Form, Json, Router};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingCredential {
        calls: Arc<AtomicUsize>,
        lifetime_secs: i64,
    }

    #[async_trait]
    impl Credential for CountingCredential {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
            assert_eq!(scope, COGNITIVE_SERVICES_SCOPE);
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            AccessToken::new(
                format!("token-{n}"),
                Utc::now() + ChronoDuration::seconds(self.lifetime_secs),
            )
        }
    }

    fn counting_provider(lifetime_secs: i64) -> (BearerTokenProvider, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let credential = CountingCredential {
            calls: calls.clone(),
            lifetime_secs,
        };
        (
            BearerTokenProvider::new(Box::new(credential), COGNITIVE_SERVICES_SCOPE),
            calls,
        )
    }

    #[tokio::test]
    async fn test_token_is_cached_while_fresh() {
        let (provider, calls) = counting_provider(3600);

        assert_eq!(provider.token().await.unwrap(), "token-1");
        assert_eq!(provider.token().await.unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_near_expiry_is_refreshed() {
        // Inside the refresh margin from the start
        let (provider, calls) = counting_provider(60);

        assert_eq!(provider.token().await.unwrap(), "token-1");
        assert_eq!(provider.token().await.unwrap(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            AccessToken::new("  ", Utc::now()),
            Err(AuthError::Empty)
        ));
    }

    #[test]
    fn test_parse_cli_output_with_epoch_expiry() {
        let now = Utc::now();
        let stdout = br#"{
            "accessToken": "eyJ0eXAi",
            "expiresOn": "2030-01-01 00:00:00.000000",
            "expires_on": 1893456000,
            "subscription": "sub",
            "tenant": "tenant",
            "tokenType": "Bearer"
        }"#;

        let token = AzureCliCredential::parse_output(stdout, now).unwrap();
        assert_eq!(token.token, "eyJ0eXAi");
        assert_eq!(token.expires_at.timestamp(), 1_893_456_000);
    }

    #[test]
    fn test_parse_cli_output_without_epoch_uses_default_ttl() {
        let now = Utc::now();
        let stdout = br#"{"accessToken": "abc", "expiresOn": "2030-01-01 00:00:00.000000"}"#;

        let token = AzureCliCredential::parse_output(stdout, now).unwrap();
        assert_eq!(
            token.expires_at,
            now + ChronoDuration::seconds(DEFAULT_TOKEN_TTL_SECS)
        );
    }

    #[test]
    fn test_parse_cli_output_garbage() {
        let err = AzureCliCredential::parse_output(b"ERROR: Please run 'az login'", Utc::now())
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_missing_cli_is_spawn_error() {
        let credential = AzureCliCredential::with_program("chat-agent-no-such-az-binary");
        let err = credential
            .get_token(COGNITIVE_SERVICES_SCOPE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Spawn { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_static_token_never_expires() {
        let token = StaticToken::new("fixed")
            .get_token(COGNITIVE_SERVICES_SCOPE)
            .await
            .unwrap();
        assert_eq!(token.token, "fixed");
        assert!(token.is_fresh(Utc::now()));
    }

    /// Talks to the in-process server directly, whatever proxy the
    /// environment configures
    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn spawn_authority() -> String {
        async fn issue(
            Path(tenant): Path<String>,
            Form(form): Form<HashMap<String, String>>,
        ) -> (axum::http::StatusCode, Json<serde_json::Value>) {
            if tenant == "contoso"
                && form.get("grant_type").map(String::as_str) == Some("client_credentials")
                && form.get("client_secret").map(String::as_str) == Some("s3cret")
                && form.get("scope").map(String::as_str) == Some(COGNITIVE_SERVICES_SCOPE)
            {
                (
                    axum::http::StatusCode::OK,
                    Json(serde_json::json!({
                        "token_type": "Bearer",
                        "expires_in": 3599,
                        "access_token": "sp-token"
                    })),
                )
            } else if tenant == "unbounded" {
                (
                    axum::http::StatusCode::OK,
                    Json(serde_json::json!({
                        "token_type": "Bearer",
                        "expires_in": i64::MAX,
                        "access_token": "sp-token"
                    })),
                )
            } else {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({
                        "error": "invalid_client",
                        "error_description": "AADSTS7000215: Invalid client secret provided."
                    })),
                )
            }
        }

        let app = Router::new().route("/:tenant/oauth2/v2.0/token", post(issue));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_client_secret_credential_success() {
        let authority = spawn_authority().await;
        let credential = ClientSecretCredential::new(
            local_client(),
            &authority,
            "contoso",
            "app-id",
            "s3cret",
        );

        let token = credential.get_token(COGNITIVE_SERVICES_SCOPE).await.unwrap();
        assert_eq!(token.token, "sp-token");
        assert!(token.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn test_client_secret_credential_out_of_range_lifetime() {
        let authority = spawn_authority().await;
        let credential = ClientSecretCredential::new(
            local_client(),
            &authority,
            "unbounded",
            "app-id",
            "s3cret",
        );

        let err = credential
            .get_token(COGNITIVE_SERVICES_SCOPE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)), "got {err:?}");
    }

    #[test]
    fn test_expiry_after_bounds() {
        let now = Utc::now();
        assert_eq!(
            expiry_after(now, 3599).unwrap(),
            now + ChronoDuration::seconds(3599)
        );
        assert!(matches!(
            expiry_after(now, -1),
            Err(AuthError::InvalidResponse(_))
        ));
        assert!(matches!(
            expiry_after(now, i64::MAX),
            Err(AuthError::InvalidResponse(_))
        ));
        // In range for TimeDelta, but past the last representable date
        assert!(matches!(
            expiry_after(now, i64::MAX / 1000),
            Err(AuthError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_client_secret_credential_rejected() {
        let authority = spawn_authority().await;
        let credential = ClientSecretCredential::new(
            local_client(),
            &authority,
            "contoso",
            "app-id",
            "wrong",
        );

        let err = credential
            .get_token(COGNITIVE_SERVICES_SCOPE)
            .await
            .unwrap_err();
        match err {
            AuthError::Rejected { status, message } => {
                assert_eq!(status, 401);
                assert!(message.starts_with("invalid_client: AADSTS7000215"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn test_default_credential_order() {
        let client = reqwest::Client::new();

        let config = CredentialConfig {
            static_token: Some("t".to_string()),
            client_secret: Some(ClientSecretConfig {
                tenant_id: "tenant".to_string(),
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            }),
            ..CredentialConfig::default()
        };
        assert_eq!(default_credential(&config, client.clone()).name(), "static");

        let config = CredentialConfig {
            static_token: None,
            ..config
        };
        assert_eq!(
            default_credential(&config, client.clone()).name(),
            "client_secret"
        );

        let config = CredentialConfig::default();
        assert_eq!(default_credential(&config, client).name(), "azure_cli");
    }
}
