//! Error taxonomy for credential operations
//!
//! Callers distinguish on variant: `NotFound`/`KeyNotFound` are recoverable,
//! `Decryption` is terminal, `RateLimited` and `ReauthorizationRequired`
//! carry enough context to act on. No variant ever carries secret material.

use std::time::Duration;

/// Convenience alias used throughout the crate
pub type Result<T, E = CredentialError> = std::result::Result<T, E>;

/// Errors produced by the store, storage backends, and providers
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// No credential exists under the given identifier
    #[error("credential not found: {id}")]
    NotFound {
        /// Identifier that was looked up
        id: String,
    },

    /// The credential exists but does not contain the referenced key
    #[error("key `{key}` not found in credential `{id}`")]
    KeyNotFound {
        /// Credential identifier
        id: String,
        /// Key name that was referenced
        key: String,
    },

    /// Stored ciphertext could not be authenticated or decrypted
    ///
    /// Indicates key mismatch, corruption, or tampering. Never retried.
    #[error("failed to decrypt credential `{id}`")]
    Decryption {
        /// Credential identifier
        id: String,
    },

    /// A provider could not produce a fresh credential
    #[error("refresh failed for credential `{id}`: {reason}")]
    Refresh {
        /// Credential identifier
        id: String,
        /// Human-readable reason (no secret material)
        reason: String,
    },

    /// The upstream authority demands a new interactive authorization
    ///
    /// Distinct from a transient [`CredentialError::Refresh`]; callers are
    /// expected to surface this to a human.
    #[error("credential `{id}` requires reauthorization")]
    ReauthorizationRequired {
        /// Credential identifier
        id: String,
        /// Upstream URL to complete reauthorization, when the manager
        /// provided one
        reauth_url: Option<String>,
    },

    /// The upstream rejected the request due to rate limiting
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Retry-after hint from the upstream, when present
        retry_after: Option<Duration>,
    },

    /// A storage backend or remote manager could not be reached
    #[error("backend unavailable: {reason}")]
    BackendUnavailable {
        /// Human-readable reason (no secret material)
        reason: String,
    },

    /// Caller programming error: read-only writes, malformed configuration,
    /// invalid template syntax in a usage spec
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong
        reason: String,
    },
}

impl CredentialError {
    /// Shorthand for a [`CredentialError::Validation`] with a formatted reason
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// True for errors a caller may reasonably recover from by falling back
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::KeyNotFound { .. } | Self::RateLimited { .. }
        )
    }
}
