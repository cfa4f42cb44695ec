//! In-memory storage backend
//!
//! Holds records in a `HashMap` behind an async lock. Useful as a test
//! double and for ephemeral stores that must not touch disk.

use crate::core::{CredentialId, CredentialObject, Result};
use crate::storage::StorageBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Writable backend with no persistence across process restarts
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<CredentialId, CredentialObject>>,
}

impl MemoryBackend {
    /// Creates an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, credential: &CredentialObject) -> Result<()> {
        self.records
            .write()
            .await
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn load(&self, id: &CredentialId) -> Result<Option<CredentialObject>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &CredentialId) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn list_all(&self) -> Result<Vec<CredentialId>> {
        let mut ids: Vec<CredentialId> = self.records.read().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    async fn exists(&self, id: &CredentialId) -> Result<bool> {
        Ok(self.records.read().await.contains_key(id))
    }
}
