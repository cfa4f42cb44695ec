//! OAuth2 lifecycle provider
//!
//! Speaks the RFC 6749 token-endpoint protocol: client-credentials and
//! refresh-token grants over form-urlencoded POST. Two output paths exist on
//! purpose: usage-spec templates are declarative (tools register them once),
//! while [`OAuth2Provider::format_request`] is imperative, producing header
//! or query placement for a specific request on demand.

use crate::core::{
    CredentialError, CredentialId, CredentialKey, CredentialKind, CredentialObject, Result,
};
use crate::provider::{DEFAULT_REFRESH_BUFFER, Provider};
use crate::store::CredentialStore;
use crate::utils::SecretString;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Provider id OAuth2-managed credentials bind to
pub const OAUTH2_PROVIDER_ID: &str = "oauth2";

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Where the access token is placed in outbound requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPlacement {
    /// `Authorization: <type> <token>` header
    #[default]
    HeaderBearer,
    /// A custom header carrying the raw token; requires `custom_header_name`
    HeaderCustom,
    /// `access_token` query parameter
    QueryParam,
}

/// Configuration for the OAuth2 provider (closed set of options)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Config {
    /// Endpoint for token-grant and refresh calls
    pub token_url: String,

    /// Client identifier sent to the token endpoint
    pub client_id: String,

    /// Client secret sent to the token endpoint
    pub client_secret: SecretString,

    /// Scopes sent when a call does not override them
    #[serde(default)]
    pub default_scopes: Vec<String>,

    /// Placement of tokens in outbound requests
    #[serde(default)]
    pub token_placement: TokenPlacement,

    /// Header name used with [`TokenPlacement::HeaderCustom`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_header_name: Option<String>,

    /// Timeout for token-endpoint calls
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub request_timeout: Duration,

    /// Additional form fields sent with every grant and refresh
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_token_params: HashMap<String, String>,
}

impl OAuth2Config {
    /// Creates a config with defaults for everything but the endpoint triple
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<SecretString>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            default_scopes: Vec::new(),
            token_placement: TokenPlacement::default(),
            custom_header_name: None,
            request_timeout: default_timeout(),
            extra_token_params: HashMap::new(),
        }
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Validation`] when `token_url` is malformed
    /// or `HeaderCustom` placement lacks `custom_header_name`.
    pub fn validate(&self) -> Result<()> {
        if !self.token_url.starts_with("http://") && !self.token_url.starts_with("https://") {
            return Err(CredentialError::validation(
                "token_url must start with http:// or https://",
            ));
        }
        if self.token_placement == TokenPlacement::HeaderCustom
            && self.custom_header_name.as_deref().unwrap_or("").is_empty()
        {
            return Err(CredentialError::validation(
                "custom_header_name is required when token_placement is header_custom",
            ));
        }
        Ok(())
    }
}

/// A parsed token-endpoint response
#[derive(Debug, Clone)]
pub struct OAuth2Token {
    /// The access token
    pub access_token: SecretString,

    /// Token type reported by the endpoint (default `Bearer`)
    pub token_type: String,

    /// Absolute expiration (now + `expires_in`), when reported
    pub expires_at: Option<DateTime<Utc>>,

    /// Rotated refresh token, when the endpoint returned one
    pub refresh_token: Option<SecretString>,

    /// Granted scopes, when reported
    pub scopes: Vec<String>,

    /// Non-sensitive extra response fields, kept as key metadata
    pub extra: HashMap<String, String>,
}

impl OAuth2Token {
    /// True iff the token has passed its absolute expiration
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() >= exp)
    }

    /// True iff the token expires within the refresh buffer (or already did)
    pub fn expires_soon(&self) -> bool {
        let buffer = chrono::Duration::from_std(DEFAULT_REFRESH_BUFFER)
            .unwrap_or(chrono::Duration::zero());
        self.expires_at.is_some_and(|exp| Utc::now() + buffer >= exp)
    }
}

/// Imperative placement output for a specific outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestCredentials {
    /// Header name → header value
    Headers(HashMap<String, String>),
    /// Query parameter name → value
    QueryParams(HashMap<String, String>),
}

/// Wire shape of an RFC 6749 token response
#[derive(Debug, Deserialize)]
struct WireTokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Wire shape of an RFC 6749 error response
#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Provider implementing the OAuth2 refresh state machine
pub struct OAuth2Provider {
    config: OAuth2Config,
    client: reqwest::Client,
}

impl OAuth2Provider {
    /// Builds a provider with its own HTTP client honoring the configured
    /// timeout
    pub fn new(config: OAuth2Config) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CredentialError::validation(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Performs a client-credentials grant
    ///
    /// Error reasons are strings without secret material; callers wrap them
    /// into [`CredentialError::Refresh`] with their credential id.
    pub(crate) async fn client_credentials_grant(
        &self,
        scopes: Option<&[String]>,
    ) -> std::result::Result<OAuth2Token, String> {
        let mut params = vec![("grant_type".to_string(), "client_credentials".to_string())];
        self.push_common_params(&mut params, scopes);
        self.token_request(params).await
    }

    /// Performs a refresh-token grant
    pub(crate) async fn refresh_token_grant(
        &self,
        refresh_token: &SecretString,
        scopes: Option<&[String]>,
    ) -> std::result::Result<OAuth2Token, String> {
        let mut params = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            (
                "refresh_token".to_string(),
                refresh_token.expose_secret(str::to_owned),
            ),
        ];
        self.push_common_params(&mut params, scopes);
        self.token_request(params).await
    }

    /// Produces placement for an outbound request according to config
    pub fn format_request(&self, token: &OAuth2Token) -> Result<RequestCredentials> {
        match self.config.token_placement {
            TokenPlacement::HeaderBearer => {
                let value = token
                    .access_token
                    .expose_secret(|t| format!("{} {t}", token.token_type));
                Ok(RequestCredentials::Headers(HashMap::from([(
                    "Authorization".to_string(),
                    value,
                )])))
            }
            TokenPlacement::HeaderCustom => {
                let name = self.config.custom_header_name.clone().ok_or_else(|| {
                    CredentialError::validation(
                        "custom_header_name is required when token_placement is header_custom",
                    )
                })?;
                Ok(RequestCredentials::Headers(HashMap::from([(
                    name,
                    token.access_token.expose_secret(str::to_owned),
                )])))
            }
            TokenPlacement::QueryParam => Ok(RequestCredentials::QueryParams(HashMap::from([(
                "access_token".to_string(),
                token.access_token.expose_secret(str::to_owned),
            )]))),
        }
    }

    fn push_common_params(&self, params: &mut Vec<(String, String)>, scopes: Option<&[String]>) {
        params.push(("client_id".to_string(), self.config.client_id.clone()));
        params.push((
            "client_secret".to_string(),
            self.config.client_secret.expose_secret(str::to_owned),
        ));
        let scopes = scopes.unwrap_or(&self.config.default_scopes);
        if !scopes.is_empty() {
            params.push(("scope".to_string(), scopes.join(" ")));
        }
        for (name, value) in &self.config.extra_token_params {
            params.push((name.clone(), value.clone()));
        }
    }

    /// POSTs the form and parses the response; errors are reasons without
    /// secret material
    async fn token_request(
        &self,
        params: Vec<(String, String)>,
    ) -> std::result::Result<OAuth2Token, String> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| format!("token endpoint unreachable: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<WireErrorResponse>()
                .await
                .ok()
                .and_then(|body| match (body.error, body.error_description) {
                    (Some(error), Some(desc)) => Some(format!("{error}: {desc}")),
                    (Some(error), None) => Some(error),
                    _ => None,
                })
                .unwrap_or_else(|| "no error body".to_string());
            return Err(format!("token endpoint returned {status} ({detail})"));
        }

        let wire: WireTokenResponse = response
            .json()
            .await
            .map_err(|e| format!("token response parse failed: {e}"))?;

        let expires_at = wire
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
        let extra = wire
            .extra
            .iter()
            .map(|(name, value)| {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), rendered)
            })
            .collect();

        Ok(OAuth2Token {
            access_token: SecretString::new(wire.access_token),
            token_type: wire.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
            refresh_token: wire.refresh_token.map(SecretString::new),
            scopes: wire
                .scope
                .map(|s| s.split_whitespace().map(ToOwned::to_owned).collect())
                .unwrap_or_default(),
            extra,
        })
    }
}

/// Writes a grant result back into a credential's key slots
fn apply_token(credential: &mut CredentialObject, token: &OAuth2Token) {
    let mut access = CredentialKey::new(token.access_token.clone())
        .with_metadata("token_type", token.token_type.clone());
    if let Some(expires_at) = token.expires_at {
        access = access.with_expiry(expires_at);
    }
    if !token.scopes.is_empty() {
        access = access.with_metadata("scope", token.scopes.join(" "));
    }
    for (name, value) in &token.extra {
        access = access.with_metadata(name.clone(), value.clone());
    }
    credential.set_key("access_token", access);

    // A rotated refresh token replaces the stored one
    if let Some(rotated) = &token.refresh_token {
        credential.set_key("refresh_token", CredentialKey::new(rotated.clone()));
    }

    credential.mark_refreshed();
}

#[async_trait]
impl Provider for OAuth2Provider {
    fn provider_id(&self) -> &str {
        OAUTH2_PROVIDER_ID
    }

    fn supported_kinds(&self) -> &[CredentialKind] {
        &[CredentialKind::OAuth2, CredentialKind::BearerToken]
    }

    async fn refresh(&self, credential: &mut CredentialObject) -> Result<()> {
        let refresh_token = credential
            .get_key("refresh_token")
            .map(|key| key.value.clone())
            .ok_or_else(|| CredentialError::Refresh {
                id: credential.id.to_string(),
                reason: "credential carries no refresh_token key".into(),
            })?;

        let token = self
            .refresh_token_grant(&refresh_token, None)
            .await
            .map_err(|reason| CredentialError::Refresh {
                id: credential.id.to_string(),
                reason,
            })?;

        apply_token(credential, &token);
        info!(
            credential_id = %credential.id,
            rotated_refresh_token = token.refresh_token.is_some(),
            "Refreshed OAuth2 credential"
        );
        Ok(())
    }

    async fn validate(&self, credential: &CredentialObject) -> bool {
        credential
            .get_key("access_token")
            .is_some_and(|key| !key.is_expired())
    }
}

/// Builds an [`OAuth2Token`] view over a stored credential
fn token_from_credential(credential: &CredentialObject) -> Result<OAuth2Token> {
    let access = credential
        .get_key("access_token")
        .ok_or_else(|| CredentialError::KeyNotFound {
            id: credential.id.to_string(),
            key: "access_token".into(),
        })?;

    Ok(OAuth2Token {
        access_token: access.value.clone(),
        token_type: access
            .metadata
            .get("token_type")
            .cloned()
            .unwrap_or_else(|| "Bearer".to_string()),
        expires_at: access.expires_at,
        refresh_token: credential
            .get_key("refresh_token")
            .map(|key| key.value.clone()),
        scopes: access
            .metadata
            .get("scope")
            .map(|s| s.split_whitespace().map(ToOwned::to_owned).collect())
            .unwrap_or_default(),
        extra: HashMap::new(),
    })
}

/// Lifecycle manager binding one provider, one credential id, and one store
///
/// Construction registers the provider with the store so the store's own
/// read path can refresh the credential under its per-id exclusion.
pub struct OAuth2Session {
    provider: Arc<OAuth2Provider>,
    store: CredentialStore,
    credential_id: CredentialId,
}

impl OAuth2Session {
    /// Creates a session and registers the provider with the store
    pub fn new(
        provider: Arc<OAuth2Provider>,
        store: CredentialStore,
        credential_id: CredentialId,
    ) -> Self {
        store.register_provider(provider.clone());
        Self {
            provider,
            store,
            credential_id,
        }
    }

    /// Returns a token valid beyond the refresh buffer, refreshing if needed
    ///
    /// A refresh failure while the current token is still unexpired is
    /// absorbed (logged, cached token returned); once the token is past its
    /// expiration the failure is fatal.
    pub async fn get_valid_token(&self) -> Result<OAuth2Token> {
        let credential = self
            .store
            .get_credential(&self.credential_id, false)
            .await?
            .ok_or_else(|| CredentialError::NotFound {
                id: self.credential_id.to_string(),
            })?;
        let current = token_from_credential(&credential)?;

        if !current.expires_soon() {
            return Ok(current);
        }

        debug!(credential_id = %self.credential_id, "Token inside refresh buffer, refreshing");
        match self.store.get_credential(&self.credential_id, true).await {
            Ok(Some(refreshed)) => token_from_credential(&refreshed),
            Ok(None) => Err(CredentialError::NotFound {
                id: self.credential_id.to_string(),
            }),
            Err(e) if !current.is_expired() => {
                warn!(
                    credential_id = %self.credential_id,
                    error = %e,
                    "Refresh failed but token is still valid, returning cached token"
                );
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    /// Performs a cold client-credentials grant and persists the result
    pub async fn acquire_via_client_credentials(
        &self,
        scopes: Option<&[String]>,
    ) -> Result<OAuth2Token> {
        let token = self
            .provider
            .client_credentials_grant(scopes)
            .await
            .map_err(|reason| CredentialError::Refresh {
                id: self.credential_id.to_string(),
                reason,
            })?;

        let mut credential =
            CredentialObject::new(self.credential_id.clone(), CredentialKind::OAuth2);
        credential.provider_id = Some(OAUTH2_PROVIDER_ID.to_string());
        credential.auto_refresh = true;
        apply_token(&mut credential, &token);

        self.store.save_credential(&credential).await?;
        info!(credential_id = %self.credential_id, "Acquired credential via client-credentials grant");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuth2Config {
        OAuth2Config::new("https://auth.example.com/token", "cid", "csecret")
    }

    fn token(expires_at: Option<DateTime<Utc>>) -> OAuth2Token {
        OAuth2Token {
            access_token: SecretString::new("tok_123"),
            token_type: "Bearer".into(),
            expires_at,
            refresh_token: None,
            scopes: vec![],
            extra: HashMap::new(),
        }
    }

    #[test]
    fn test_custom_header_requires_name() {
        let mut config = config();
        config.token_placement = TokenPlacement::HeaderCustom;
        assert!(matches!(
            config.validate(),
            Err(CredentialError::Validation { .. })
        ));

        config.custom_header_name = Some("X-Api-Token".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_format_header_bearer() {
        let provider = OAuth2Provider::new(config()).unwrap();
        let formatted = provider.format_request(&token(None)).unwrap();
        assert_eq!(
            formatted,
            RequestCredentials::Headers(HashMap::from([(
                "Authorization".to_string(),
                "Bearer tok_123".to_string()
            )]))
        );
    }

    #[test]
    fn test_format_header_custom() {
        let mut cfg = config();
        cfg.token_placement = TokenPlacement::HeaderCustom;
        cfg.custom_header_name = Some("X-Api-Token".into());
        let provider = OAuth2Provider::new(cfg).unwrap();

        let formatted = provider.format_request(&token(None)).unwrap();
        assert_eq!(
            formatted,
            RequestCredentials::Headers(HashMap::from([(
                "X-Api-Token".to_string(),
                "tok_123".to_string()
            )]))
        );
    }

    #[test]
    fn test_format_query_param() {
        let mut cfg = config();
        cfg.token_placement = TokenPlacement::QueryParam;
        let provider = OAuth2Provider::new(cfg).unwrap();

        let formatted = provider.format_request(&token(None)).unwrap();
        assert_eq!(
            formatted,
            RequestCredentials::QueryParams(HashMap::from([(
                "access_token".to_string(),
                "tok_123".to_string()
            )]))
        );
    }

    #[test]
    fn test_expiry_buffer() {
        // Expires in 2 minutes: not expired, but inside the 5-minute buffer
        let soon = token(Some(Utc::now() + chrono::Duration::minutes(2)));
        assert!(!soon.is_expired());
        assert!(soon.expires_soon());

        let fresh = token(Some(Utc::now() + chrono::Duration::hours(1)));
        assert!(!fresh.expires_soon());

        let past = token(Some(Utc::now() - chrono::Duration::minutes(1)));
        assert!(past.is_expired());
    }

    #[test]
    fn test_apply_token_rotates_refresh_token() {
        let id = CredentialId::new("github_oauth").unwrap();
        let mut credential = CredentialObject::oauth2(
            id,
            CredentialKey::new("old_access"),
            "old_refresh",
        );

        let mut new_token = token(Some(Utc::now() + chrono::Duration::hours(1)));
        new_token.refresh_token = Some(SecretString::new("new_refresh"));
        apply_token(&mut credential, &new_token);

        assert_eq!(
            credential.get_key("access_token").unwrap().value,
            SecretString::new("tok_123")
        );
        assert_eq!(
            credential.get_key("refresh_token").unwrap().value,
            SecretString::new("new_refresh")
        );
        assert!(credential.last_refreshed.is_some());
    }

    #[test]
    fn test_apply_token_keeps_refresh_token_when_not_rotated() {
        let id = CredentialId::new("github_oauth").unwrap();
        let mut credential = CredentialObject::oauth2(
            id,
            CredentialKey::new("old_access"),
            "old_refresh",
        );

        apply_token(&mut credential, &token(None));

        assert_eq!(
            credential.get_key("refresh_token").unwrap().value,
            SecretString::new("old_refresh")
        );
    }

    #[test]
    fn test_token_from_credential_requires_access_token() {
        let id = CredentialId::new("svc").unwrap();
        let credential = CredentialObject::new(id, CredentialKind::OAuth2);
        assert!(matches!(
            token_from_credential(&credential),
            Err(CredentialError::KeyNotFound { .. })
        ));
    }
}
