//! Hive Credential - unified credential store for tool and agent frameworks
//!
//! Stores opaque secret values, refreshes expiring OAuth2 material, and
//! resolves `{{cred.key}}` templates that tools declare for outbound
//! requests. The store holds values; tools hold usage templates; the two
//! concerns never cross.
//!
//! # Features
//!
//! - **Template resolution** - `{{id}}` / `{{id.key}}` references with a
//!   default-key rule for single-key credentials
//! - **Pluggable storage** - encrypted files (AES-256-GCM), environment
//!   variables, Vault KV v2
//! - **Lifecycle providers** - static secrets, OAuth2 refresh, remote sync
//! - **Coordinated refresh** - per-credential exclusion, TTL cache,
//!   read-your-writes ordering
//! - **Secret hygiene** - values zeroized on drop and redacted in debug
//!   output
#![deny(unsafe_code)]
#![forbid(unsafe_code)]

/// Core types and errors
pub mod core;
/// Lifecycle providers (static, OAuth2, remote sync)
pub mod provider;
/// Storage backend implementations
pub mod storage;
/// Credential store - high-level API
pub mod store;
/// Template reference grammar and substitution
pub mod template;
/// Crypto, retry, and secret-container utilities
pub mod utils;

// ── Root re-exports ─────────────────────────────────────────────────────────
// Commonly-used types available directly as `hive_credential::TypeName`.

// Core types & errors
pub use crate::core::{
    CredentialError, CredentialId, CredentialKey, CredentialKind, CredentialObject,
    CredentialUsageSpec, Result, SecretString,
};

// Traits
pub use crate::provider::Provider;
pub use crate::storage::StorageBackend;

// Store
pub use crate::store::{CacheStats, CredentialStore, CredentialStoreBuilder};

// Utils - crypto
pub use crate::utils::{EncryptedData, EncryptionKey, decrypt, encrypt};

/// Commonly used types and traits
pub mod prelude {
    // Core types
    pub use crate::core::{
        CredentialError, CredentialId, CredentialKey, CredentialKind, CredentialObject,
        CredentialUsageSpec, SecretString,
    };

    // Traits
    pub use crate::provider::Provider;
    pub use crate::storage::StorageBackend;

    // Storage backends
    pub use crate::storage::{
        EncryptedFileBackend, EnvVarBackend, MemoryBackend, VaultBackend, VaultConfig,
    };

    // Providers
    pub use crate::provider::{
        AdenConfig, AdenProvider, OAuth2Config, OAuth2Provider, OAuth2Session, OAuth2Token,
        RequestCredentials, StaticProvider, TokenPlacement,
    };

    // Store
    pub use crate::store::{CacheConfig, CacheStats, CredentialStore, CredentialStoreBuilder};

    // Utils - crypto and retry
    pub use crate::utils::{EncryptedData, EncryptionKey, RetryPolicy, decrypt, encrypt};
}
