//! Read-only backend mapping credential ids to environment variables
//!
//! Lookup order on every request: process environment first, then the
//! optional `.env`-style file. Process env wins, nothing is cached across
//! calls, and the process environment is never mutated.

use crate::core::{CredentialError, CredentialId, CredentialObject, Result};
use crate::storage::StorageBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Suffix applied when an id has no explicit variable mapping
const FALLBACK_SUFFIX: &str = "_API_KEY";

/// Read-only storage backend over environment variables
///
/// Unmapped ids fall back to `<UPPERCASE_ID>_API_KEY`; a hit produces a
/// single-key [`CredentialKind::ApiKey`] credential with the key `api_key`.
///
/// # Examples
///
/// ```no_run
/// use hive_credential::storage::EnvVarBackend;
///
/// let backend = EnvVarBackend::new()
///     .map_credential("brave_search", "BRAVE_SEARCH_API_KEY")
///     .with_env_file("/etc/hive/.env");
/// ```
#[derive(Debug, Default)]
pub struct EnvVarBackend {
    /// Explicit credential id → environment variable name
    mapping: HashMap<String, String>,

    /// Optional `.env`-style file consulted after the process environment
    env_file: Option<PathBuf>,
}

impl EnvVarBackend {
    /// Creates a backend with no explicit mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an explicit id → variable mapping (builder pattern)
    pub fn map_credential(
        mut self,
        id: impl Into<String>,
        var_name: impl Into<String>,
    ) -> Self {
        self.mapping.insert(id.into(), var_name.into());
        self
    }

    /// Consults the given `.env`-style file after the process environment
    /// (builder pattern)
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Variable name in effect for the given id
    fn var_name(&self, id: &CredentialId) -> String {
        self.mapping
            .get(id.as_str())
            .cloned()
            .unwrap_or_else(|| format!("{}{FALLBACK_SUFFIX}", id.as_str().to_uppercase()))
    }

    /// Resolves a variable: process environment first, then the env file
    fn lookup(&self, var_name: &str) -> Option<String> {
        if let Ok(value) = std::env::var(var_name) {
            return Some(value);
        }

        let path = self.env_file.as_ref()?;
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Env file not readable");
                return None;
            }
        };
        for item in iter {
            match item {
                Ok((name, value)) if name == var_name => return Some(value),
                Ok(_) => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping malformed env file entry");
                }
            }
        }
        None
    }

    fn read_only_error(&self, operation: &str) -> CredentialError {
        CredentialError::validation(format!(
            "env-var backend is read-only: cannot {operation}"
        ))
    }
}

#[async_trait]
impl StorageBackend for EnvVarBackend {
    fn name(&self) -> &'static str {
        "env"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn save(&self, credential: &CredentialObject) -> Result<()> {
        Err(self.read_only_error(&format!("save `{}`", credential.id)))
    }

    async fn load(&self, id: &CredentialId) -> Result<Option<CredentialObject>> {
        let var_name = self.var_name(id);
        match self.lookup(&var_name) {
            Some(value) => {
                debug!(credential_id = %id, var = %var_name, "Resolved credential from environment");
                Ok(Some(CredentialObject::api_key(id.clone(), value)))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &CredentialId) -> Result<bool> {
        Err(self.read_only_error(&format!("delete `{id}`")))
    }

    async fn list_all(&self) -> Result<Vec<CredentialId>> {
        // Only explicitly mapped ids are enumerable; fallback names are
        // derived per request and cannot be listed.
        let mut ids = Vec::new();
        for (id, var_name) in &self.mapping {
            if self.lookup(var_name).is_some() {
                if let Ok(id) = CredentialId::new(id.as_str()) {
                    ids.push(id);
                }
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    async fn exists(&self, id: &CredentialId) -> Result<bool> {
        Ok(self.lookup(&self.var_name(id)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CredentialKind;
    use std::io::Write as _;

    #[test]
    fn test_fallback_var_name() {
        let backend = EnvVarBackend::new();
        let id = CredentialId::new("brave_search").unwrap();
        assert_eq!(backend.var_name(&id), "BRAVE_SEARCH_API_KEY");
    }

    #[test]
    fn test_explicit_mapping_wins_over_fallback() {
        let backend = EnvVarBackend::new().map_credential("brave_search", "BRAVE_TOKEN");
        let id = CredentialId::new("brave_search").unwrap();
        assert_eq!(backend.var_name(&id), "BRAVE_TOKEN");
    }

    #[tokio::test]
    async fn test_env_file_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "FILE_ONLY_SERVICE_API_KEY=from_file").unwrap();

        let backend = EnvVarBackend::new().with_env_file(file.path());
        let id = CredentialId::new("file_only_service").unwrap();

        let credential = backend.load(&id).await.unwrap().unwrap();
        assert_eq!(credential.kind, CredentialKind::ApiKey);
        credential
            .get_key("api_key")
            .unwrap()
            .value
            .expose_secret(|s| assert_eq!(s, "from_file"));
    }

    #[tokio::test]
    async fn test_absent_credential_is_none() {
        let backend = EnvVarBackend::new();
        let id = CredentialId::new("definitely_not_configured_xyz").unwrap();
        assert!(backend.load(&id).await.unwrap().is_none());
        assert!(!backend.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_rejected() {
        let backend = EnvVarBackend::new();
        let id = CredentialId::new("anything").unwrap();
        let credential = CredentialObject::api_key(id.clone(), "v");

        assert!(matches!(
            backend.save(&credential).await,
            Err(CredentialError::Validation { .. })
        ));
        assert!(matches!(
            backend.delete(&id).await,
            Err(CredentialError::Validation { .. })
        ));
        assert!(backend.is_read_only());
    }
}
