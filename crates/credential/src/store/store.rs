//! Credential store - the public façade
//!
//! Composes a storage backend, the provider registry, the usage-spec
//! registry, the template resolver, and a TTL cache behind one `Clone`
//! handle. Shared state lives in an `Arc`; registries are guarded by
//! `parking_lot` locks, and refresh is serialized per credential id so
//! concurrent readers of an expiring credential trigger exactly one refresh.
//!
//! Commit order on refresh is storage first, cache second: a reader can see
//! a stale cache entry, never a cache entry that storage does not hold.

use crate::core::{
    CredentialError, CredentialId, CredentialObject, CredentialUsageSpec, Result,
    STATIC_PROVIDER_ID, SecretString,
};
use crate::provider::{Provider, StaticProvider};
use crate::storage::{EnvVarBackend, StorageBackend};
use crate::store::cache::{CacheConfig, CacheLayer, CacheStats};
use crate::store::refresh::RefreshCoordinator;
use crate::template;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Unified store for secrets, their lifecycle, and template resolution
///
/// Cloning is cheap and shares all state.
///
/// # Examples
///
/// ```no_run
/// use hive_credential::prelude::*;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), CredentialError> {
/// let store = CredentialStore::builder()
///     .storage(Arc::new(EnvVarBackend::new()))
///     .build();
///
/// let header = store
///     .resolve("X-Subscription-Token: {{brave_search.api_key}}", true)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    storage: Arc<dyn StorageBackend>,
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    usage_specs: RwLock<HashMap<CredentialId, CredentialUsageSpec>>,
    cache: CacheLayer,
    refresh: RefreshCoordinator,
    auto_refresh: bool,
}

impl CredentialStore {
    /// Creates a builder for constructing a store
    pub fn builder() -> CredentialStoreBuilder {
        CredentialStoreBuilder::new()
    }

    /// Registers or replaces a lifecycle provider by its `provider_id`
    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        let provider_id = provider.provider_id().to_string();
        let replaced = self
            .inner
            .providers
            .write()
            .insert(provider_id.clone(), provider)
            .is_some();
        debug!(provider_id = %provider_id, replaced, "Registered provider");
    }

    /// Records a tool's usage declaration, replacing any earlier spec for
    /// the same credential id
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Validation`] when a template map contains
    /// malformed reference syntax.
    pub fn register_usage(&self, spec: CredentialUsageSpec) -> Result<()> {
        spec.validate_templates()?;
        let credential_id = spec.credential_id.clone();
        self.inner
            .usage_specs
            .write()
            .insert(credential_id.clone(), spec);
        debug!(credential_id = %credential_id, "Registered usage spec");
        Ok(())
    }

    /// Returns the credential, refreshing it first when requested and due
    ///
    /// Cache-aside read path: a non-stale cache entry is returned directly;
    /// otherwise the record is loaded from storage and cached. When
    /// `refresh_if_needed` is set (and auto-refresh is enabled on both the
    /// store and the credential), a credential whose provider reports
    /// `should_refresh` is refreshed under the per-id exclusion and
    /// persisted before being returned.
    pub async fn get_credential(
        &self,
        id: &CredentialId,
        refresh_if_needed: bool,
    ) -> Result<Option<CredentialObject>> {
        // Lock-free fast path: a non-stale cache entry that needs no refresh
        if let Some(credential) = self.inner.cache.get(id).await {
            if !self.wants_refresh(&credential, refresh_if_needed) {
                return Ok(Some(finish_read(credential)));
            }
        }
        self.read_coordinated(id, refresh_if_needed).await
    }

    /// Convenience: the secret under `key_name`, or absence
    pub async fn get_key(
        &self,
        id: &CredentialId,
        key_name: &str,
    ) -> Result<Option<SecretString>> {
        let Some(credential) = self.get_credential(id, true).await? else {
            return Ok(None);
        };
        Ok(credential.get_key(key_name).map(|key| key.value.clone()))
    }

    /// Legacy convenience: the default-key secret (same selection rule the
    /// template resolver uses), or absence of the credential
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::KeyNotFound`] when the credential exists
    /// but holds no keys.
    pub async fn get(&self, id: &CredentialId) -> Result<Option<SecretString>> {
        let Some(credential) = self.get_credential(id, true).await? else {
            return Ok(None);
        };
        let (_, key) = credential
            .default_key()
            .ok_or_else(|| CredentialError::KeyNotFound {
                id: id.to_string(),
                key: "(default)".into(),
            })?;
        Ok(Some(key.value.clone()))
    }

    /// Resolves every `{{id[.key]}}` reference in the template
    ///
    /// Each referenced credential is snapshotted once per call, so repeated
    /// references observe one consistent value even under concurrent
    /// refresh. A missing credential fails with
    /// [`CredentialError::NotFound`] iff `fail_on_missing`; otherwise the
    /// reference text is left verbatim. A missing key within a present
    /// credential always fails with [`CredentialError::KeyNotFound`].
    pub async fn resolve(&self, template: &str, fail_on_missing: bool) -> Result<String> {
        let references = template::extract_references(template);

        let mut snapshots: HashMap<String, Option<CredentialObject>> = HashMap::new();
        for reference in &references {
            if snapshots.contains_key(&reference.id) {
                continue;
            }
            // The reference grammar is a subset of valid credential ids
            let snapshot = match CredentialId::new(reference.id.as_str()) {
                Ok(id) => self.get_credential(&id, true).await?,
                Err(_) => None,
            };
            snapshots.insert(reference.id.clone(), snapshot);
        }

        template::substitute(template, |reference| {
            match snapshots.get(&reference.id).and_then(Option::as_ref) {
                None => {
                    if fail_on_missing {
                        Err(CredentialError::NotFound {
                            id: reference.id.clone(),
                        })
                    } else {
                        Ok(None)
                    }
                }
                Some(credential) => {
                    let key = match &reference.key {
                        Some(key_name) => credential.get_key(key_name).ok_or_else(|| {
                            CredentialError::KeyNotFound {
                                id: reference.id.clone(),
                                key: key_name.clone(),
                            }
                        })?,
                        None => {
                            credential
                                .default_key()
                                .map(|(_, key)| key)
                                .ok_or_else(|| CredentialError::KeyNotFound {
                                    id: reference.id.clone(),
                                    key: "(default)".into(),
                                })?
                        }
                    };
                    Ok(Some(key.value.expose_secret(str::to_owned)))
                }
            }
        })
    }

    /// Applies [`CredentialStore::resolve`] to each value, preserving keys
    pub async fn resolve_headers(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        let mut resolved = HashMap::with_capacity(headers.len());
        for (name, template) in headers {
            resolved.insert(name.clone(), self.resolve(template, true).await?);
        }
        Ok(resolved)
    }

    /// Resolves the registered usage spec's header map
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Validation`] when no spec is registered
    /// for the id.
    pub async fn resolve_for_usage(
        &self,
        id: &CredentialId,
    ) -> Result<HashMap<String, String>> {
        let headers = {
            let specs = self.inner.usage_specs.read();
            let spec = specs.get(id).ok_or_else(|| {
                CredentialError::validation(format!("no usage spec registered for `{id}`"))
            })?;
            spec.headers.clone()
        };
        self.resolve_headers(&headers).await
    }

    /// Missing required key names from the registered usage spec
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Validation`] when no spec is registered,
    /// or [`CredentialError::NotFound`] when the credential is absent.
    pub async fn validate_for_usage(&self, id: &CredentialId) -> Result<Vec<String>> {
        let spec = {
            let specs = self.inner.usage_specs.read();
            specs
                .get(id)
                .cloned()
                .ok_or_else(|| {
                    CredentialError::validation(format!("no usage spec registered for `{id}`"))
                })?
        };
        let credential = self
            .get_credential(id, false)
            .await?
            .ok_or_else(|| CredentialError::NotFound { id: id.to_string() })?;
        Ok(spec.missing_keys(&credential))
    }

    /// Persists a credential, then populates the cache
    ///
    /// Serialized against refreshes and deletes of the same id, so a
    /// subsequent read from any task observes at least this saved state.
    pub async fn save_credential(&self, credential: &CredentialObject) -> Result<()> {
        let lock = self.inner.refresh.lock_for(&credential.id);
        let _guard = lock.lock().await;

        self.inner.storage.save(credential).await?;
        self.inner.cache.invalidate(&credential.id).await;
        self.inner.cache.insert(credential.clone()).await;
        info!(credential_id = %credential.id, backend = self.inner.storage.name(), "Saved credential");
        Ok(())
    }

    /// Removes the credential; returns whether it existed
    ///
    /// Holds the id's lock across evict-then-delete so a concurrent
    /// cache-miss read cannot re-populate the cache with the doomed record;
    /// no read after this returns can observe the deleted credential.
    pub async fn delete_credential(&self, id: &CredentialId) -> Result<bool> {
        let lock = self.inner.refresh.lock_for(id);
        let _guard = lock.lock().await;

        self.inner.cache.invalidate(id).await;
        let existed = self.inner.storage.delete(id).await?;
        info!(credential_id = %id, existed, "Deleted credential");
        Ok(existed)
    }

    /// All credential ids known to the storage backend
    pub async fn list_credentials(&self) -> Result<Vec<CredentialId>> {
        self.inner.storage.list_all().await
    }

    /// True iff a read without refresh returns the credential
    pub async fn is_available(&self, id: &CredentialId) -> bool {
        matches!(self.get_credential(id, false).await, Ok(Some(_)))
    }

    /// Cache performance statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Evicts a single cache entry
    pub async fn invalidate_cache(&self, id: &CredentialId) {
        self.inner.cache.invalidate(id).await;
    }

    /// Evicts every cache entry
    pub fn clear_cache(&self) {
        self.inner.cache.invalidate_all();
    }

    fn wants_refresh(&self, credential: &CredentialObject, refresh_if_needed: bool) -> bool {
        refresh_if_needed
            && self.inner.auto_refresh
            && credential.auto_refresh
            && self.provider_for(credential).should_refresh(credential)
    }

    fn provider_for(&self, credential: &CredentialObject) -> Arc<dyn Provider> {
        let providers = self.inner.providers.read();
        let wanted = credential.effective_provider_id();
        if let Some(provider) = providers.get(wanted) {
            return provider.clone();
        }
        warn!(
            credential_id = %credential.id,
            provider_id = %wanted,
            "No provider registered under this id, treating credential as static"
        );
        providers
            .get(STATIC_PROVIDER_ID)
            .cloned()
            .unwrap_or_else(|| Arc::new(StaticProvider::new()))
    }

    /// Slow read path, serialized per credential id
    ///
    /// Re-checks after acquiring the id's mutex: a waiter that lost a
    /// refresh race observes the winner's refreshed record and returns it
    /// without a second refresh; a reader racing a delete observes absence.
    async fn read_coordinated(
        &self,
        id: &CredentialId,
        refresh_if_needed: bool,
    ) -> Result<Option<CredentialObject>> {
        let lock = self.inner.refresh.lock_for(id);
        let _guard = lock.lock().await;

        let current = match self.inner.cache.get(id).await {
            Some(credential) => credential,
            None => match self.inner.storage.load(id).await? {
                Some(credential) => {
                    debug!(
                        credential_id = %id,
                        backend = self.inner.storage.name(),
                        "Loaded credential from storage"
                    );
                    credential
                }
                None => return Ok(None),
            },
        };

        if !self.wants_refresh(&current, refresh_if_needed) {
            self.inner.cache.insert(current.clone()).await;
            return Ok(Some(finish_read(current)));
        }

        let provider = self.provider_for(&current);
        info!(
            credential_id = %id,
            provider_id = %provider.provider_id(),
            "Refreshing credential"
        );
        let mut credential = current;
        provider.refresh(&mut credential).await?;

        // Persist before any cache state reflects the refresh
        self.inner.storage.save(&credential).await?;
        self.inner.cache.invalidate(id).await;
        self.inner.cache.insert(credential.clone()).await;

        Ok(Some(finish_read(credential)))
    }
}

/// Stamps usage counters onto the snapshot handed to the caller
///
/// Counters advance on the snapshot only; they are persisted by the next
/// save or refresh. Re-inserting on every read would reset the cache
/// entry's TTL and let a rotated secret linger indefinitely.
fn finish_read(mut credential: CredentialObject) -> CredentialObject {
    credential.mark_used();
    credential
}

/// Builder for [`CredentialStore`]
///
/// Defaults: environment-variable backend, static provider only, 300 s
/// cache TTL, auto-refresh enabled.
pub struct CredentialStoreBuilder {
    storage: Option<Arc<dyn StorageBackend>>,
    providers: Vec<Arc<dyn Provider>>,
    cache_config: CacheConfig,
    auto_refresh: bool,
}

impl CredentialStoreBuilder {
    fn new() -> Self {
        Self {
            storage: None,
            providers: Vec::new(),
            cache_config: CacheConfig::default(),
            auto_refresh: true,
        }
    }

    /// Sets the storage backend (default: [`EnvVarBackend`])
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Registers a provider at construction time
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Sets the cache TTL (default 300 s)
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_config.ttl = ttl;
        self
    }

    /// Sets the cache capacity (default 1024 entries)
    pub fn cache_max_size(mut self, max_capacity: usize) -> Self {
        self.cache_config.max_capacity = max_capacity;
        self
    }

    /// Enables or disables automatic refresh on the read path (default on)
    pub fn auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    /// Builds the store
    pub fn build(self) -> CredentialStore {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(EnvVarBackend::new()));

        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        providers.insert(
            STATIC_PROVIDER_ID.to_string(),
            Arc::new(StaticProvider::new()),
        );
        for provider in self.providers {
            providers.insert(provider.provider_id().to_string(), provider);
        }

        CredentialStore {
            inner: Arc::new(StoreInner {
                storage,
                providers: RwLock::new(providers),
                usage_specs: RwLock::new(HashMap::new()),
                cache: CacheLayer::new(&self.cache_config),
                refresh: RefreshCoordinator::new(),
                auto_refresh: self.auto_refresh,
            }),
        }
    }
}

impl Default for CredentialStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
