//! Cache layer for credential reads with hit/miss tracking

use crate::core::{CredentialId, CredentialObject};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for cache entries
    pub ttl: Duration,

    /// Maximum number of cached credentials
    pub max_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300), // 5 minutes
            max_capacity: 1024,
        }
    }
}

/// Cache layer wrapping moka with hit/miss tracking
///
/// TTL eviction bounds how long a rotated secret can linger in memory after
/// storage-level rotation.
pub(crate) struct CacheLayer {
    cache: Cache<CredentialId, CredentialObject>,
    hits: AtomicU64,
    misses: AtomicU64,
    config: CacheConfig,
}

impl CacheLayer {
    /// Creates a cache from configuration
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity as u64)
            .time_to_live(config.ttl)
            .build();
        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            config: config.clone(),
        }
    }

    /// Gets a credential snapshot (increments hit/miss counters)
    pub async fn get(&self, id: &CredentialId) -> Option<CredentialObject> {
        match self.cache.get(id).await {
            Some(credential) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(credential)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces the cached copy
    pub async fn insert(&self, credential: CredentialObject) {
        self.cache.insert(credential.id.clone(), credential).await;
    }

    /// Evicts a single entry
    pub async fn invalidate(&self, id: &CredentialId) {
        self.cache.invalidate(id).await;
    }

    /// Evicts every entry
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Current performance statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.cache.entry_count(),
            max_capacity: self.config.max_capacity,
        }
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,

    /// Total cache misses
    pub misses: u64,

    /// Current number of cached entries (may lag under concurrent writes)
    pub size: u64,

    /// Maximum cache capacity
    pub max_capacity: usize,
}

impl CacheStats {
    /// Hit rate in `[0.0, 1.0]`; 0.0 before any request
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
