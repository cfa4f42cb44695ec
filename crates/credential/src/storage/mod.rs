//! Storage backends for credential records
//!
//! A backend owns persistence and its own serialization format, but must
//! preserve the identifier, kind tag, provider id, every key with its value
//! and expiration, and the usage counters that existed at save time.

pub mod encrypted_file;
pub mod env;
pub mod memory;
pub mod vault;

pub use encrypted_file::EncryptedFileBackend;
pub use env::EnvVarBackend;
pub use memory::MemoryBackend;
pub use vault::{VaultBackend, VaultConfig};

use crate::core::{CredentialId, CredentialObject, Result};
use async_trait::async_trait;

/// Persistence authority for credentials
///
/// Absence is not an error: `load` returns `Ok(None)` for unknown ids and
/// `delete` reports whether anything existed. Read-only backends fail
/// `save`/`delete` with [`CredentialError::Validation`](crate::CredentialError::Validation).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logging
    fn name(&self) -> &'static str;

    /// True for backends that cannot persist writes
    fn is_read_only(&self) -> bool {
        false
    }

    /// Persists a credential record, replacing any previous record with the
    /// same id
    async fn save(&self, credential: &CredentialObject) -> Result<()>;

    /// Loads a credential record; `Ok(None)` when absent
    async fn load(&self, id: &CredentialId) -> Result<Option<CredentialObject>>;

    /// Deletes a credential record; returns whether it existed
    async fn delete(&self, id: &CredentialId) -> Result<bool>;

    /// All credential ids known to this backend
    async fn list_all(&self) -> Result<Vec<CredentialId>>;

    /// True iff a record exists; backends override with lighter checks
    async fn exists(&self, id: &CredentialId) -> Result<bool> {
        Ok(self.load(id).await?.is_some())
    }
}
