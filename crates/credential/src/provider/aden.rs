//! Remote-sync provider delegating refresh to an Aden secret manager
//!
//! The manager owns the upstream OAuth dance; this provider only mirrors its
//! state over a small HTTPS contract:
//!
//! ```text
//! GET  /credentials/<id>            current credential
//! POST /credentials/<id>/refresh    force a refresh, return the result
//! GET  /credentials                 list
//! GET  /credentials/<id>/validate   validity check with structured reasons
//! ```
//!
//! When the manager is briefly unreachable and the local copy has not yet
//! expired, the provider degrades gracefully and keeps the local copy.

use crate::core::{
    CredentialError, CredentialId, CredentialKey, CredentialKind, CredentialObject, Result,
};
use crate::provider::Provider;
use crate::utils::{RetryPolicy, SecretString, retry_with_policy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Provider id Aden-managed credentials bind to
pub const ADEN_PROVIDER_ID: &str = "aden";

/// Environment variables consulted by [`AdenConfig::from_env`]
const API_URL_ENV_VAR: &str = "ADEN_API_URL";
const API_KEY_ENV_VAR: &str = "ADEN_API_KEY";
const TENANT_ENV_VAR: &str = "ADEN_TENANT_ID";

/// Namespace header conveying multi-tenancy
const TENANT_HEADER: &str = "X-Aden-Tenant";

fn default_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Configuration for the Aden sync provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdenConfig {
    /// Base URL of the Aden manager
    pub api_url: String,

    /// Agent key sent as a bearer token
    pub api_key: SecretString,

    /// Optional tenant id (sent as the `X-Aden-Tenant` header)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Retry policy for transient network failures only
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl AdenConfig {
    /// Creates a config with defaults for timeout and retries
    pub fn new(api_url: impl Into<String>, api_key: impl Into<SecretString>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            tenant_id: None,
            timeout: default_timeout(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Reads `ADEN_API_URL`, `ADEN_API_KEY`, and `ADEN_TENANT_ID`
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Validation`] naming the missing variable.
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var(API_URL_ENV_VAR)
            .map_err(|_| CredentialError::validation(format!("{API_URL_ENV_VAR} is unset")))?;
        let api_key = std::env::var(API_KEY_ENV_VAR)
            .map_err(|_| CredentialError::validation(format!("{API_KEY_ENV_VAR} is unset")))?;
        let mut config = Self::new(api_url, SecretString::new(api_key));
        config.tenant_id = std::env::var(TENANT_ENV_VAR).ok();
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(CredentialError::validation(
                "aden api_url must start with http:// or https://",
            ));
        }
        if self.api_key.is_empty() {
            return Err(CredentialError::validation("aden api_key is empty"));
        }
        Ok(())
    }
}

/// Wire shape of a credential held by the manager
#[derive(Debug, Deserialize)]
pub struct AdenCredential {
    /// Current access token (redacted in debug output)
    pub access_token: SecretString,
    /// Absolute expiration, when the manager reports one
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Manager-side metadata
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

/// Wire shape of a refresh/validate error body
#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    requires_reauthorization: bool,
    #[serde(default)]
    reauthorization_url: Option<String>,
}

/// Wire shape of a validity check
#[derive(Debug, Deserialize)]
pub struct AdenValidation {
    /// Whether the manager considers the credential usable
    pub valid: bool,
    /// Structured reasons (`token_expired`, `refresh_token_revoked`, …)
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Provider that mirrors credentials managed by an Aden server
pub struct AdenProvider {
    config: AdenConfig,
    client: reqwest::Client,
}

impl AdenProvider {
    /// Builds a provider with its own HTTP client honoring the configured
    /// timeout
    pub fn new(config: AdenConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CredentialError::validation(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .config
            .api_key
            .expose_secret(|key| self.client.request(method, url).bearer_auth(key));
        if let Some(tenant) = &self.config.tenant_id {
            builder = builder.header(TENANT_HEADER, tenant);
        }
        builder
    }

    /// Sends with bounded retries; only the transport's own errors retry,
    /// HTTP error statuses pass through untouched
    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        url: &str,
        operation: &str,
    ) -> Result<reqwest::Response> {
        retry_with_policy(&self.config.retry_policy, operation, || {
            let request = self.request(method.clone(), url);
            async move { request.send().await }
        })
        .await
        .map_err(|e| CredentialError::BackendUnavailable {
            reason: format!("aden manager unreachable: {e}"),
        })
    }

    async fn error_from_response(id: &CredentialId, response: reqwest::Response) -> CredentialError {
        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                CredentialError::RateLimited { retry_after }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CredentialError::validation(
                format!("aden manager rejected the agent key ({status})"),
            ),
            _ => {
                let body: WireError = response.json().await.unwrap_or_default();
                if body.requires_reauthorization {
                    CredentialError::ReauthorizationRequired {
                        id: id.to_string(),
                        reauth_url: body.reauthorization_url,
                    }
                } else {
                    CredentialError::Refresh {
                        id: id.to_string(),
                        reason: format!(
                            "aden manager returned {status} ({})",
                            body.error.unwrap_or_else(|| "no error body".into())
                        ),
                    }
                }
            }
        }
    }

    /// Fetches the manager's current view of a credential
    pub async fn fetch(&self, id: &CredentialId) -> Result<Option<AdenCredential>> {
        let url = self.url(&format!("/credentials/{id}"));
        let response = self
            .send_with_retry(reqwest::Method::GET, &url, "aden_fetch")
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let wire = response.json().await.map_err(|e| {
                    CredentialError::BackendUnavailable {
                        reason: format!("aden response body: {e}"),
                    }
                })?;
                Ok(Some(wire))
            }
            _ => Err(Self::error_from_response(id, response).await),
        }
    }

    /// Forces the manager to refresh and returns its new state
    async fn force_refresh(&self, id: &CredentialId) -> Result<AdenCredential> {
        let url = self.url(&format!("/credentials/{id}/refresh"));
        let response = self
            .send_with_retry(reqwest::Method::POST, &url, "aden_refresh")
            .await?;
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CredentialError::BackendUnavailable {
                    reason: format!("aden response body: {e}"),
                })
        } else {
            Err(Self::error_from_response(id, response).await)
        }
    }

    /// Lists credential ids known to the manager
    pub async fn list(&self) -> Result<Vec<CredentialId>> {
        #[derive(Deserialize)]
        struct ListResponse {
            credentials: Vec<String>,
        }

        let url = self.url("/credentials");
        let response = self
            .send_with_retry(reqwest::Method::GET, &url, "aden_list")
            .await?;
        if !response.status().is_success() {
            return Err(CredentialError::BackendUnavailable {
                reason: format!("aden manager returned {} during list", response.status()),
            });
        }
        let body: ListResponse =
            response
                .json()
                .await
                .map_err(|e| CredentialError::BackendUnavailable {
                    reason: format!("aden response body: {e}"),
                })?;
        Ok(body
            .credentials
            .into_iter()
            .filter_map(|id| CredentialId::new(id).ok())
            .collect())
    }

    /// Asks the manager whether a credential is valid, with reasons
    pub async fn validate_remote(&self, id: &CredentialId) -> Result<AdenValidation> {
        let url = self.url(&format!("/credentials/{id}/validate"));
        let response = self
            .send_with_retry(reqwest::Method::GET, &url, "aden_validate")
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(id, response).await);
        }
        response
            .json()
            .await
            .map_err(|e| CredentialError::BackendUnavailable {
                reason: format!("aden response body: {e}"),
            })
    }

    /// Writes the manager's state into the local credential
    fn apply_remote(credential: &mut CredentialObject, remote: AdenCredential) {
        let mut access = CredentialKey::new(remote.access_token);
        if let Some(expires_at) = remote.expires_at {
            access = access.with_expiry(expires_at);
        }
        if !remote.scopes.is_empty() {
            access = access.with_metadata("scope", remote.scopes.join(" "));
        }
        for (name, value) in remote.metadata {
            access = access.with_metadata(name, value);
        }
        credential.set_key("access_token", access);
        credential.mark_refreshed();
    }
}

#[async_trait]
impl Provider for AdenProvider {
    fn provider_id(&self) -> &str {
        ADEN_PROVIDER_ID
    }

    fn supported_kinds(&self) -> &[CredentialKind] {
        &[CredentialKind::OAuth2, CredentialKind::BearerToken]
    }

    async fn refresh(&self, credential: &mut CredentialObject) -> Result<()> {
        match self.force_refresh(&credential.id).await {
            Ok(remote) => {
                Self::apply_remote(credential, remote);
                debug!(credential_id = %credential.id, "Synced credential from aden manager");
                Ok(())
            }
            // Brief manager outage with a still-usable local copy: keep it
            Err(CredentialError::BackendUnavailable { reason })
                if !credential.needs_refresh() =>
            {
                warn!(
                    credential_id = %credential.id,
                    reason = %reason,
                    "Aden manager unreachable, keeping unexpired local credential"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn validate(&self, credential: &CredentialObject) -> bool {
        match self.validate_remote(&credential.id).await {
            Ok(validation) => validation.valid,
            // Manager unreachable: fall back to local expiry
            Err(_) => !credential.needs_refresh(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(AdenConfig::new("https://aden.example.com", "ak_1")
            .validate()
            .is_ok());
        assert!(AdenConfig::new("aden.example.com", "ak_1")
            .validate()
            .is_err());
        assert!(AdenConfig::new("https://aden.example.com", "")
            .validate()
            .is_err());
    }

    #[test]
    fn test_apply_remote_sets_access_token() {
        let id = CredentialId::new("notion_oauth").unwrap();
        let mut credential = CredentialObject::new(id, CredentialKind::OAuth2);
        let expires = Utc::now() + chrono::Duration::hours(1);

        AdenProvider::apply_remote(
            &mut credential,
            AdenCredential {
                access_token: "at_new".into(),
                expires_at: Some(expires),
                scopes: vec!["read".into(), "write".into()],
                metadata: std::collections::HashMap::new(),
            },
        );

        let access = credential.get_key("access_token").unwrap();
        assert_eq!(access.value, SecretString::new("at_new"));
        assert_eq!(access.expires_at, Some(expires));
        assert_eq!(access.metadata.get("scope").map(String::as_str), Some("read write"));
        assert!(credential.last_refreshed.is_some());
    }
}
