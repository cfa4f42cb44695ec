//! Credential identifier with validation
//!
//! Provides a validated [`CredentialId`] newtype that prevents path
//! traversal through the file backend and malformed remote-manager paths.

use crate::core::CredentialError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for credential IDs
const MAX_ID_LENGTH: usize = 255;

/// Unique credential identifier (validated)
///
/// Only allows alphanumeric characters, hyphens, and underscores. Identifiers
/// are caller-chosen stable strings such as `github_oauth` or `brave_search`.
///
/// # Examples
///
/// ```
/// use hive_credential::CredentialId;
///
/// let id = CredentialId::new("github_oauth").unwrap();
/// assert_eq!(id.as_str(), "github_oauth");
///
/// assert!(CredentialId::new("").is_err()); // Empty
/// assert!(CredentialId::new("../etc/passwd").is_err()); // Path traversal
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialId(String);

impl CredentialId {
    /// Creates a new validated credential ID
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Validation`] if the ID is empty, exceeds
    /// 255 characters, or contains characters other than alphanumerics,
    /// hyphens, or underscores.
    pub fn new(id: impl Into<String>) -> Result<Self, CredentialError> {
        let id = id.into();

        if id.is_empty() {
            return Err(CredentialError::validation("credential id is empty"));
        }

        if id.len() > MAX_ID_LENGTH {
            return Err(CredentialError::validation(format!(
                "credential id exceeds maximum length of {MAX_ID_LENGTH} characters"
            )));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CredentialError::validation(format!(
                "credential id `{id}` contains invalid characters \
                 (only alphanumeric, hyphens, underscores allowed)"
            )));
        }

        Ok(Self(id))
    }

    /// Returns the credential ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts into the owned string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CredentialId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CredentialId {
    type Error = CredentialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CredentialId {
    type Error = CredentialError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::str::FromStr for CredentialId {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<CredentialId> for String {
    fn from(id: CredentialId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(CredentialId::new("github_oauth").is_ok());
        assert!(CredentialId::new("aws-access-key-123").is_ok());
        assert!(CredentialId::new("A").is_ok());
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(matches!(
            CredentialId::new(""),
            Err(CredentialError::Validation { .. })
        ));
    }

    #[test]
    fn test_path_traversal_rejected() {
        assert!(CredentialId::new("../etc/passwd").is_err());
        assert!(CredentialId::new("a/b").is_err());
        assert!(CredentialId::new("token with spaces").is_err());
    }

    #[test]
    fn test_length_limit() {
        let long = "a".repeat(256);
        assert!(CredentialId::new(long).is_err());
        let ok = "a".repeat(255);
        assert!(CredentialId::new(ok).is_ok());
    }

    #[test]
    fn test_serde_round_trip() {
        let id = CredentialId::new("brave_search").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"brave_search\"");
        let back: CredentialId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let result: Result<CredentialId, _> = serde_json::from_str("\"../x\"");
        assert!(result.is_err());
    }
}
