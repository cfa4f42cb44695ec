//! A single named secret slot within a credential

use crate::utils::SecretString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One secret value with optional expiration and open metadata
///
/// The key's name is the map key inside
/// [`CredentialObject`](crate::core::CredentialObject); the struct itself
/// only carries the value and its lifecycle attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialKey {
    /// The opaque secret value (redacted in debug output)
    pub value: SecretString,

    /// Absolute expiration instant (UTC), `None` if the value never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Open metadata map (token type, scopes, raw response fields)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl CredentialKey {
    /// Creates a key with no expiration
    pub fn new(value: impl Into<SecretString>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
            metadata: HashMap::new(),
        }
    }

    /// Sets the absolute expiration instant (builder pattern)
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets expiration relative to now (builder pattern)
    pub fn expiring_in(self, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        self.with_expiry(Utc::now() + ttl)
    }

    /// Adds a metadata entry (builder pattern)
    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// True iff an expiration is set and the current UTC instant is at or
    /// past it
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() >= exp)
    }

    /// True iff an expiration is set and falls within `buffer` of now
    ///
    /// Already-expired keys also report true.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::zero());
        self.expires_at.is_some_and(|exp| Utc::now() + buffer >= exp)
    }
}
