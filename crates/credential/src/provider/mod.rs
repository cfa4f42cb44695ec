//! Lifecycle providers
//!
//! A provider is the lifecycle authority for the credential kinds it
//! supports: refresh, validation, and revocation. The store binds each
//! credential to a provider through `provider_id`; credentials that declare
//! none get [`StaticProvider`].

pub mod aden;
pub mod oauth2;

pub use aden::{AdenConfig, AdenProvider};
pub use oauth2::{
    OAuth2Config, OAuth2Provider, OAuth2Session, OAuth2Token, RequestCredentials, TokenPlacement,
};

use crate::core::{CredentialKind, CredentialObject, Result, STATIC_PROVIDER_ID};
use async_trait::async_trait;
use std::time::Duration;

/// Default buffer before absolute expiration within which a credential is
/// considered due for refresh
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Lifecycle authority for a set of credential kinds
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier credentials bind to via `provider_id`
    fn provider_id(&self) -> &str;

    /// Credential kinds this provider can manage
    fn supported_kinds(&self) -> &[CredentialKind];

    /// Refreshes the credential in place
    ///
    /// Implementations mutate the passed credential (new key values, rotated
    /// secondary secrets) and must advance `last_refreshed`. Fails with
    /// [`CredentialError::Refresh`](crate::CredentialError::Refresh) when no
    /// lifecycle action can produce a usable credential.
    ///
    /// The store invokes this while holding the credential's refresh lock:
    /// implementations must not call back into the store for the same id.
    async fn refresh(&self, credential: &mut CredentialObject) -> Result<()>;

    /// Side-effect-free check that the credential is still usable
    async fn validate(&self, credential: &CredentialObject) -> bool;

    /// Policy decision: should the store refresh this credential now?
    ///
    /// Default: true iff any key has an expiration within
    /// [`DEFAULT_REFRESH_BUFFER`] of now.
    fn should_refresh(&self, credential: &CredentialObject) -> bool {
        credential.expires_within(DEFAULT_REFRESH_BUFFER)
    }

    /// Revokes the credential upstream; returns whether anything was revoked
    async fn revoke(&self, _credential: &mut CredentialObject) -> Result<bool> {
        Ok(false)
    }
}

/// Provider for credentials with no lifecycle: API keys and custom secrets
///
/// Refresh returns the credential unchanged, validation only checks that a
/// key is present, and refresh is never requested.
#[derive(Debug, Default)]
pub struct StaticProvider;

impl StaticProvider {
    /// Creates the static provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn provider_id(&self) -> &str {
        STATIC_PROVIDER_ID
    }

    fn supported_kinds(&self) -> &[CredentialKind] {
        &[
            CredentialKind::ApiKey,
            CredentialKind::BasicAuth,
            CredentialKind::Custom,
        ]
    }

    async fn refresh(&self, _credential: &mut CredentialObject) -> Result<()> {
        Ok(())
    }

    async fn validate(&self, credential: &CredentialObject) -> bool {
        !credential.is_empty()
    }

    fn should_refresh(&self, _credential: &CredentialObject) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CredentialId, CredentialKey};
    use chrono::Utc;

    #[tokio::test]
    async fn test_static_provider_contract() {
        let provider = StaticProvider::new();
        let id = CredentialId::new("svc").unwrap();
        let mut credential = CredentialObject::api_key(id.clone(), "v");

        assert_eq!(provider.provider_id(), "static");
        assert!(provider.validate(&credential).await);
        assert!(!provider.should_refresh(&credential));
        assert!(!provider.revoke(&mut credential).await.unwrap());

        let before = credential.last_refreshed;
        provider.refresh(&mut credential).await.unwrap();
        assert_eq!(credential.last_refreshed, before);

        let empty = CredentialObject::new(id, crate::core::CredentialKind::Custom);
        assert!(!provider.validate(&empty).await);
    }

    #[test]
    fn test_default_should_refresh_uses_buffer() {
        struct Probe;
        #[async_trait]
        impl Provider for Probe {
            fn provider_id(&self) -> &str {
                "probe"
            }
            fn supported_kinds(&self) -> &[CredentialKind] {
                &[CredentialKind::BearerToken]
            }
            async fn refresh(&self, _c: &mut CredentialObject) -> Result<()> {
                Ok(())
            }
            async fn validate(&self, _c: &CredentialObject) -> bool {
                true
            }
        }

        let id = CredentialId::new("svc").unwrap();
        let mut credential = CredentialObject::new(id, CredentialKind::BearerToken);

        // Expires in 2 minutes: inside the 5-minute buffer
        credential.set_key(
            "access_token",
            CredentialKey::new("t").with_expiry(Utc::now() + chrono::Duration::minutes(2)),
        );
        assert!(Probe.should_refresh(&credential));

        // Expires in an hour: outside the buffer
        credential.set_key(
            "access_token",
            CredentialKey::new("t").with_expiry(Utc::now() + chrono::Duration::hours(1)),
        );
        assert!(!Probe.should_refresh(&credential));
    }
}
