//! Vault KV v2 storage backend
//!
//! Talks to a versioned key-value secret engine over HTTPS. Credential
//! records are flattened into the secret's data map: key names carry their
//! values directly, and reserved `_`-prefixed entries carry the record
//! shape (`_type`, `_provider_id`, `_expires_<keyname>`, usage counters).
//!
//! Status mapping: 404 on load is absence, 401/403 are caller errors
//! (`Validation`), anything the network refuses is `BackendUnavailable`.

use crate::core::{
    CredentialError, CredentialId, CredentialKey, CredentialKind, CredentialObject, Result,
};
use crate::storage::StorageBackend;
use crate::utils::SecretString;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;

/// Environment variable consulted when the config carries no token
const TOKEN_ENV_VAR: &str = "VAULT_TOKEN";

/// Reserved data-map entries that describe the record rather than a key
const RESERVED_TYPE: &str = "_type";
const RESERVED_PROVIDER: &str = "_provider_id";
const RESERVED_EXPIRES_PREFIX: &str = "_expires_";
const RESERVED_USE_COUNT: &str = "_use_count";
const RESERVED_LAST_USED: &str = "_last_used_at";
const RESERVED_LAST_REFRESHED: &str = "_last_refreshed";

/// Configuration for the Vault KV v2 backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault server address (e.g. `https://vault.example.com:8200`)
    pub address: String,

    /// Bearer token; falls back to `VAULT_TOKEN` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretString>,

    /// KV v2 mount path (default `secret`)
    pub mount_path: String,

    /// Path prefix for all credentials under the mount
    pub path_prefix: String,

    /// Optional namespace (`X-Vault-Namespace` header)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: "https://127.0.0.1:8200".into(),
            token: None,
            mount_path: "secret".into(),
            path_prefix: "hive/credentials".into(),
            namespace: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl VaultConfig {
    /// Validates configuration parameters before a client is built
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(CredentialError::validation("vault address is empty"));
        }
        if !self.address.starts_with("http://") && !self.address.starts_with("https://") {
            return Err(CredentialError::validation(
                "vault address must start with http:// or https://",
            ));
        }
        if self.mount_path.is_empty() {
            return Err(CredentialError::validation("vault mount_path is empty"));
        }
        if self.mount_path.starts_with('/') || self.mount_path.ends_with('/') {
            return Err(CredentialError::validation(
                "vault mount_path must not start or end with '/'",
            ));
        }
        if self.path_prefix.is_empty() {
            return Err(CredentialError::validation("vault path_prefix is empty"));
        }
        if self.path_prefix.starts_with('/') {
            return Err(CredentialError::validation(
                "vault path_prefix must not start with '/' (relative to mount path)",
            ));
        }
        let timeout_secs = self.timeout.as_secs();
        if !(1..=60).contains(&timeout_secs) {
            return Err(CredentialError::validation(format!(
                "vault timeout must be between 1 and 60 seconds, got {timeout_secs}"
            )));
        }
        Ok(())
    }
}

/// Storage backend over a Vault KV v2 engine
pub struct VaultBackend {
    client: reqwest::Client,
    config: VaultConfig,
    token: SecretString,
}

impl VaultBackend {
    /// Builds a backend, resolving the token from config or `VAULT_TOKEN`
    pub fn new(config: VaultConfig) -> Result<Self> {
        config.validate()?;

        let token = match &config.token {
            Some(token) => token.clone(),
            None => std::env::var(TOKEN_ENV_VAR)
                .map(SecretString::new)
                .map_err(|_| {
                    CredentialError::validation(format!(
                        "no vault token in config and {TOKEN_ENV_VAR} is unset"
                    ))
                })?,
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CredentialError::validation(format!("http client: {e}")))?;

        Ok(Self {
            client,
            config,
            token,
        })
    }

    fn data_url(&self, id: &CredentialId) -> String {
        format!(
            "{}/v1/{}/data/{}/{id}",
            self.config.address.trim_end_matches('/'),
            self.config.mount_path,
            self.config.path_prefix,
        )
    }

    fn metadata_url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/{}/metadata/{}{suffix}",
            self.config.address.trim_end_matches('/'),
            self.config.mount_path,
            self.config.path_prefix,
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .token
            .expose_secret(|t| self.client.request(method, url).header("X-Vault-Token", t));
        if let Some(namespace) = &self.config.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        builder
    }

    /// Flattens a credential into the KV v2 data map
    fn to_secret_map(credential: &CredentialObject) -> Map<String, Value> {
        let mut map = Map::new();
        for (name, key) in credential.keys() {
            map.insert(
                name.to_string(),
                Value::String(key.value.expose_secret(str::to_owned)),
            );
            if let Some(expires) = key.expires_at {
                map.insert(
                    format!("{RESERVED_EXPIRES_PREFIX}{name}"),
                    Value::String(expires.to_rfc3339()),
                );
            }
        }
        map.insert(RESERVED_TYPE.into(), json!(credential.kind));
        if let Some(provider_id) = &credential.provider_id {
            map.insert(RESERVED_PROVIDER.into(), Value::String(provider_id.clone()));
        }
        map.insert(RESERVED_USE_COUNT.into(), json!(credential.use_count));
        if let Some(last_used) = credential.last_used_at {
            map.insert(
                RESERVED_LAST_USED.into(),
                Value::String(last_used.to_rfc3339()),
            );
        }
        if let Some(last_refreshed) = credential.last_refreshed {
            map.insert(
                RESERVED_LAST_REFRESHED.into(),
                Value::String(last_refreshed.to_rfc3339()),
            );
        }
        map
    }

    /// Reverses [`Self::to_secret_map`], reconstructing per-key expirations
    fn from_secret_map(id: &CredentialId, map: &Map<String, Value>) -> CredentialObject {
        let kind = map
            .get(RESERVED_TYPE)
            .and_then(|v| serde_json::from_value::<CredentialKind>(v.clone()).ok())
            .unwrap_or(CredentialKind::Custom);

        let mut credential = CredentialObject::new(id.clone(), kind);
        credential.provider_id = map
            .get(RESERVED_PROVIDER)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        credential.use_count = map
            .get(RESERVED_USE_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        credential.last_used_at = parse_instant(map.get(RESERVED_LAST_USED));
        credential.last_refreshed = parse_instant(map.get(RESERVED_LAST_REFRESHED));

        for (name, value) in map {
            if name.starts_with('_') {
                continue;
            }
            let Some(value) = value.as_str() else { continue };
            let mut key = CredentialKey::new(value);
            if let Some(expires) =
                parse_instant(map.get(&format!("{RESERVED_EXPIRES_PREFIX}{name}")))
            {
                key = key.with_expiry(expires);
            }
            credential.set_key(name.clone(), key);
        }
        credential
    }

    fn map_send_error(e: &reqwest::Error) -> CredentialError {
        CredentialError::BackendUnavailable {
            reason: format!("vault request failed: {e}"),
        }
    }

    fn map_status(status: StatusCode, context: &str) -> CredentialError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CredentialError::validation(
                format!("vault rejected the token ({status}) during {context}"),
            ),
            _ => CredentialError::BackendUnavailable {
                reason: format!("vault returned {status} during {context}"),
            },
        }
    }
}

#[async_trait]
impl StorageBackend for VaultBackend {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn save(&self, credential: &CredentialObject) -> Result<()> {
        let url = self.data_url(&credential.id);
        let body = json!({ "data": Self::to_secret_map(credential) });

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "save"));
        }
        debug!(credential_id = %credential.id, "Stored secret in vault");
        Ok(())
    }

    async fn load(&self, id: &CredentialId) -> Result<Option<CredentialObject>> {
        let url = self.data_url(id);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                #[derive(Deserialize)]
                struct KvData {
                    data: Map<String, Value>,
                }
                #[derive(Deserialize)]
                struct KvResponse {
                    data: KvData,
                }

                let body: KvResponse = response.json().await.map_err(|e| {
                    CredentialError::BackendUnavailable {
                        reason: format!("vault response body: {e}"),
                    }
                })?;
                Ok(Some(Self::from_secret_map(id, &body.data.data)))
            }
            status => Err(Self::map_status(status, "load")),
        }
    }

    async fn delete(&self, id: &CredentialId) -> Result<bool> {
        let url = self.metadata_url(&format!("/{id}"));
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Self::map_status(status, "delete")),
        }
    }

    async fn list_all(&self) -> Result<Vec<CredentialId>> {
        let url = format!("{}?list=true", self.metadata_url(""));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                #[derive(Deserialize)]
                struct ListData {
                    keys: Vec<String>,
                }
                #[derive(Deserialize)]
                struct ListResponse {
                    data: ListData,
                }

                let body: ListResponse = response.json().await.map_err(|e| {
                    CredentialError::BackendUnavailable {
                        reason: format!("vault response body: {e}"),
                    }
                })?;
                let mut ids = Vec::new();
                for key in body.data.keys {
                    // Trailing slashes denote sub-directories
                    if let Ok(id) = CredentialId::new(key.trim_end_matches('/')) {
                        ids.push(id);
                    }
                }
                Ok(ids)
            }
            status => Err(Self::map_status(status, "list")),
        }
    }

    async fn exists(&self, id: &CredentialId) -> Result<bool> {
        let url = self.metadata_url(&format!("/{id}"));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Self::map_status(status, "exists")),
        }
    }
}

fn parse_instant(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
