//! Encrypted-at-rest file backend
//!
//! Layout under the base path:
//!
//! ```text
//! <base>/credentials/<id>.enc   one AES-256-GCM envelope per credential
//! <base>/metadata/index.json    advisory id index
//! ```
//!
//! The per-credential file is authoritative; the index only exists so
//! operators can see what the directory holds without the key. Writes go
//! through a temp file and rename, so a concurrent reader never observes a
//! truncated envelope.

use crate::core::{CredentialError, CredentialId, CredentialObject, Result};
use crate::storage::StorageBackend;
use crate::utils::{EncryptedData, EncryptionKey, decrypt, encrypt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tokio::fs;
use tracing::{debug, warn};

static GENERATED_KEY_WARNING: Once = Once::new();

/// Advisory index persisted at `metadata/index.json`
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialIndex {
    credential_ids: BTreeSet<String>,
}

/// File-based backend with authenticated encryption at rest
pub struct EncryptedFileBackend {
    base_path: PathBuf,
    key: EncryptionKey,
}

impl EncryptedFileBackend {
    /// Opens a backend with an explicit master key
    pub async fn with_key(base_path: impl Into<PathBuf>, key: EncryptionKey) -> Result<Self> {
        let base_path = base_path.into();
        let backend = Self { base_path, key };
        backend.ensure_layout().await?;
        Ok(backend)
    }

    /// Opens a backend, sourcing the master key from the environment
    ///
    /// Key acquisition order: `HIVE_CREDENTIAL_KEY` (base64, 32 bytes), then
    /// a freshly generated key. Generation is announced once per process with
    /// a warning naming the variable; without it, ciphertexts written now are
    /// unreadable after restart.
    pub async fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let key = match std::env::var(EncryptionKey::DEFAULT_ENV_VAR) {
            Ok(encoded) => EncryptionKey::from_base64(&encoded).map_err(|e| {
                CredentialError::validation(format!(
                    "{}: {e}",
                    EncryptionKey::DEFAULT_ENV_VAR
                ))
            })?,
            Err(_) => {
                GENERATED_KEY_WARNING.call_once(|| {
                    warn!(
                        env_var = EncryptionKey::DEFAULT_ENV_VAR,
                        "No master key configured; generated an ephemeral key. \
                         Credentials written with it become unreadable after \
                         restart unless the variable is set"
                    );
                });
                EncryptionKey::generate()
            }
        };
        Self::with_key(base_path, key).await
    }

    async fn ensure_layout(&self) -> Result<()> {
        for dir in [self.credentials_dir(), self.metadata_dir()] {
            fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        }
        Ok(())
    }

    fn credentials_dir(&self) -> PathBuf {
        self.base_path.join("credentials")
    }

    fn metadata_dir(&self) -> PathBuf {
        self.base_path.join("metadata")
    }

    fn credential_path(&self, id: &CredentialId) -> PathBuf {
        self.credentials_dir().join(format!("{id}.enc"))
    }

    fn index_path(&self) -> PathBuf {
        self.metadata_dir().join("index.json")
    }

    /// Write-then-rename so readers never see a partial file
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))
    }

    async fn read_index(&self) -> CredentialIndex {
        // The index is advisory; on any failure start from empty
        match fs::read(self.index_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => CredentialIndex::default(),
        }
    }

    async fn update_index(&self, id: &CredentialId, present: bool) -> Result<()> {
        let mut index = self.read_index().await;
        let changed = if present {
            index.credential_ids.insert(id.to_string())
        } else {
            index.credential_ids.remove(id.as_str())
        };
        if changed {
            let bytes = serde_json::to_vec_pretty(&index)
                .map_err(|e| CredentialError::validation(format!("index serialization: {e}")))?;
            self.write_atomic(&self.index_path(), &bytes).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for EncryptedFileBackend {
    fn name(&self) -> &'static str {
        "encrypted_file"
    }

    async fn save(&self, credential: &CredentialObject) -> Result<()> {
        let plaintext = serde_json::to_vec(credential)
            .map_err(|e| CredentialError::validation(format!("record serialization: {e}")))?;

        let envelope = encrypt(&self.key, &plaintext).map_err(|_| CredentialError::Decryption {
            id: credential.id.to_string(),
        })?;
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| CredentialError::validation(format!("envelope serialization: {e}")))?;

        let path = self.credential_path(&credential.id);
        self.write_atomic(&path, &bytes).await?;
        self.update_index(&credential.id, true).await?;

        debug!(credential_id = %credential.id, path = %path.display(), "Saved encrypted credential");
        Ok(())
    }

    async fn load(&self, id: &CredentialId) -> Result<Option<CredentialObject>> {
        let path = self.credential_path(id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        // Any failure from here on means corruption, tampering, or a wrong
        // key; never silently return empty.
        let envelope: EncryptedData =
            serde_json::from_slice(&bytes).map_err(|_| CredentialError::Decryption {
                id: id.to_string(),
            })?;
        let plaintext = decrypt(&self.key, &envelope).map_err(|_| CredentialError::Decryption {
            id: id.to_string(),
        })?;
        let credential: CredentialObject =
            serde_json::from_slice(&plaintext).map_err(|_| CredentialError::Decryption {
                id: id.to_string(),
            })?;

        Ok(Some(credential))
    }

    async fn delete(&self, id: &CredentialId) -> Result<bool> {
        let path = self.credential_path(id);
        let existed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(io_error(&path, e)),
        };
        self.update_index(id, false).await?;
        Ok(existed)
    }

    async fn list_all(&self) -> Result<Vec<CredentialId>> {
        let dir = self.credentials_dir();
        let mut entries = fs::read_dir(&dir).await.map_err(|e| io_error(&dir, e))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".enc") {
                if let Ok(id) = CredentialId::new(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    async fn exists(&self, id: &CredentialId) -> Result<bool> {
        Ok(fs::try_exists(self.credential_path(id)).await.unwrap_or(false))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> CredentialError {
    CredentialError::BackendUnavailable {
        reason: format!("{}: {e}", path.display()),
    }
}
