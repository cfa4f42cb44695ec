//! Credential bundle: a named set of secret keys for one upstream service

use crate::core::{CredentialId, CredentialKey};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Provider id implied when a credential declares none
pub const STATIC_PROVIDER_ID: &str = "static";

/// Key names tried, in order, when a template reference omits the key
const DEFAULT_KEY_CANDIDATES: [&str; 3] = ["value", "api_key", "access_token"];

/// Kind tag for a credential (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Static API key
    ApiKey,
    /// OAuth2 access/refresh token pair
    #[serde(rename = "oauth2")]
    OAuth2,
    /// Username + password pair
    BasicAuth,
    /// Long-lived bearer token
    BearerToken,
    /// Anything else; lifecycle is the caller's concern
    Custom,
}

/// A named bundle of secret keys representing one credential
///
/// The keys map preserves insertion order: the default-key selection rule
/// falls back to the first-inserted key, so order is load-bearing.
///
/// Key mutation goes through [`CredentialObject::set_key`] /
/// [`CredentialObject::remove_key`], which advance `updated_at`; the map is
/// not exposed mutably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialObject {
    /// Stable identifier, e.g. `github_oauth`
    pub id: CredentialId,

    /// Kind tag
    #[serde(rename = "credential_type")]
    pub kind: CredentialKind,

    /// Named secret slots, insertion-ordered
    keys: IndexMap<String, CredentialKey>,

    /// Lifecycle authority; `None` implies the static provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Whether the store may refresh this credential automatically
    #[serde(default)]
    pub auto_refresh: bool,

    /// When a provider last refreshed this credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refreshed: Option<DateTime<Utc>>,

    /// When the store last handed this credential to a caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    /// Number of reads served
    #[serde(default)]
    pub use_count: u64,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// User-defined tags for organization
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,

    /// Creation instant
    pub created_at: DateTime<Utc>,

    /// Last mutation of the keys map; moves monotonically forward
    pub updated_at: DateTime<Utc>,
}

impl CredentialObject {
    /// Creates an empty credential of the given kind
    pub fn new(id: CredentialId, kind: CredentialKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            keys: IndexMap::new(),
            provider_id: None,
            auto_refresh: false,
            last_refreshed: None,
            last_used_at: None,
            use_count: 0,
            description: None,
            tags: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Single-key API-key credential with the conventional `api_key` slot
    pub fn api_key(id: CredentialId, value: impl Into<String>) -> Self {
        let mut credential = Self::new(id, CredentialKind::ApiKey);
        credential.set_key("api_key", CredentialKey::new(value.into()));
        credential
    }

    /// Bearer-token credential with an `access_token` slot
    pub fn bearer(id: CredentialId, token: impl Into<String>) -> Self {
        let mut credential = Self::new(id, CredentialKind::BearerToken);
        credential.set_key("access_token", CredentialKey::new(token.into()));
        credential
    }

    /// OAuth2 credential with access and refresh token slots
    ///
    /// Bound to the `oauth2` provider with auto-refresh enabled, since that
    /// is the only configuration under which the refresh token is useful.
    pub fn oauth2(
        id: CredentialId,
        access_token: CredentialKey,
        refresh_token: impl Into<String>,
    ) -> Self {
        let mut credential = Self::new(id, CredentialKind::OAuth2);
        credential.provider_id = Some("oauth2".to_string());
        credential.auto_refresh = true;
        credential.set_key("access_token", access_token);
        credential.set_key("refresh_token", CredentialKey::new(refresh_token.into()));
        credential
    }

    /// Sets the description (builder pattern)
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the lifecycle provider (builder pattern)
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Enables automatic refresh (builder pattern)
    pub fn with_auto_refresh(mut self) -> Self {
        self.auto_refresh = true;
        self
    }

    /// Provider id in effect, falling back to the static provider
    pub fn effective_provider_id(&self) -> &str {
        self.provider_id.as_deref().unwrap_or(STATIC_PROVIDER_ID)
    }

    /// Inserts or replaces a key, advancing `updated_at`
    pub fn set_key(&mut self, name: impl Into<String>, key: CredentialKey) {
        self.keys.insert(name.into(), key);
        self.mark_modified();
    }

    /// Removes a key, advancing `updated_at`; returns whether it was present
    pub fn remove_key(&mut self, name: &str) -> bool {
        // shift_remove keeps the insertion order of the remaining keys intact
        let removed = self.keys.shift_remove(name).is_some();
        if removed {
            self.mark_modified();
        }
        removed
    }

    /// Looks up a key by name
    pub fn get_key(&self, name: &str) -> Option<&CredentialKey> {
        self.keys.get(name)
    }

    /// True iff the named key is present
    pub fn has_key(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    /// Iterates keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = (&str, &CredentialKey)> {
        self.keys.iter().map(|(name, key)| (name.as_str(), key))
    }

    /// Key names in insertion order
    pub fn key_names(&self) -> Vec<&str> {
        self.keys.keys().map(String::as_str).collect()
    }

    /// Number of keys
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// True iff the credential holds no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Default-key selection: `value`, then `api_key`, then `access_token`,
    /// then the first key in insertion order
    ///
    /// Returns `None` iff the keys map is empty.
    pub fn default_key(&self) -> Option<(&str, &CredentialKey)> {
        for candidate in DEFAULT_KEY_CANDIDATES {
            if let Some((name, key)) = self.keys.get_key_value(candidate) {
                return Some((name.as_str(), key));
            }
        }
        self.keys.first().map(|(name, key)| (name.as_str(), key))
    }

    /// True iff any contained key is expired
    pub fn needs_refresh(&self) -> bool {
        self.keys.values().any(CredentialKey::is_expired)
    }

    /// True iff any contained key expires within `buffer` of now
    pub fn expires_within(&self, buffer: Duration) -> bool {
        self.keys.values().any(|key| key.expires_within(buffer))
    }

    /// Records a successful read
    ///
    /// Usage counters are not key mutations, so `updated_at` is untouched.
    pub fn mark_used(&mut self) {
        self.last_used_at = Some(Utc::now());
        self.use_count = self.use_count.saturating_add(1);
    }

    /// Records a completed provider refresh
    pub fn mark_refreshed(&mut self) {
        self.last_refreshed = Some(Utc::now());
    }

    fn mark_modified(&mut self) {
        // max() keeps updated_at monotone even if the wall clock steps back
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> CredentialId {
        CredentialId::new(s).unwrap()
    }

    #[test]
    fn test_api_key_constructor() {
        let credential = CredentialObject::api_key(id("brave_search"), "BSA_X");
        assert_eq!(credential.kind, CredentialKind::ApiKey);
        assert!(credential.has_key("api_key"));
        assert_eq!(credential.effective_provider_id(), "static");
    }

    #[test]
    fn test_oauth2_constructor() {
        let access = CredentialKey::new("ghp_123").expiring_in(Duration::from_secs(3600));
        let credential = CredentialObject::oauth2(id("github_oauth"), access, "ghr_456");
        assert_eq!(credential.kind, CredentialKind::OAuth2);
        assert!(credential.auto_refresh);
        assert_eq!(credential.effective_provider_id(), "oauth2");
        assert!(credential.has_key("access_token"));
        assert!(credential.has_key("refresh_token"));
    }

    #[test]
    fn test_default_key_prefers_value_then_api_key_then_access_token() {
        let mut credential = CredentialObject::new(id("c"), CredentialKind::Custom);
        credential.set_key("other", CredentialKey::new("o"));
        credential.set_key("access_token", CredentialKey::new("at"));
        credential.set_key("api_key", CredentialKey::new("ak"));
        credential.set_key("value", CredentialKey::new("v"));

        assert_eq!(credential.default_key().unwrap().0, "value");

        credential.remove_key("value");
        assert_eq!(credential.default_key().unwrap().0, "api_key");

        credential.remove_key("api_key");
        assert_eq!(credential.default_key().unwrap().0, "access_token");

        credential.remove_key("access_token");
        // Falls back to first-inserted
        assert_eq!(credential.default_key().unwrap().0, "other");

        credential.remove_key("other");
        assert!(credential.default_key().is_none());
    }

    #[test]
    fn test_first_inserted_order_survives_removal() {
        let mut credential = CredentialObject::new(id("c"), CredentialKind::Custom);
        credential.set_key("first", CredentialKey::new("1"));
        credential.set_key("second", CredentialKey::new("2"));
        credential.set_key("third", CredentialKey::new("3"));
        credential.remove_key("first");

        assert_eq!(credential.default_key().unwrap().0, "second");
    }

    #[test]
    fn test_updated_at_advances_on_key_mutation() {
        let mut credential = CredentialObject::new(id("c"), CredentialKind::ApiKey);
        let before = credential.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        credential.set_key("api_key", CredentialKey::new("v"));
        assert!(credential.updated_at > before);
    }

    #[test]
    fn test_mark_used_does_not_touch_updated_at() {
        let mut credential = CredentialObject::api_key(id("c"), "v");
        let updated = credential.updated_at;
        credential.mark_used();
        assert_eq!(credential.updated_at, updated);
        assert_eq!(credential.use_count, 1);
        assert!(credential.last_used_at.is_some());
    }

    #[test]
    fn test_needs_refresh_iff_any_key_expired() {
        let mut credential = CredentialObject::new(id("c"), CredentialKind::OAuth2);
        credential.set_key("access_token", CredentialKey::new("at"));
        assert!(!credential.needs_refresh());

        credential.set_key(
            "old",
            CredentialKey::new("x").with_expiry(Utc::now() - chrono::Duration::seconds(10)),
        );
        assert!(credential.needs_refresh());
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&CredentialKind::OAuth2).unwrap(),
            "\"oauth2\""
        );
        assert_eq!(
            serde_json::to_string(&CredentialKind::ApiKey).unwrap(),
            "\"api_key\""
        );
        assert_eq!(
            serde_json::to_string(&CredentialKind::BearerToken).unwrap(),
            "\"bearer_token\""
        );
    }

    #[test]
    fn test_serde_round_trip_preserves_key_order() {
        let mut credential = CredentialObject::new(id("c"), CredentialKind::Custom);
        credential.set_key("zeta", CredentialKey::new("1"));
        credential.set_key("alpha", CredentialKey::new("2"));

        let json = serde_json::to_string(&credential).unwrap();
        let back: CredentialObject = serde_json::from_str(&json).unwrap();

        assert_eq!(back.key_names(), vec!["zeta", "alpha"]);
        assert_eq!(back.default_key().unwrap().0, "zeta");
    }
}
