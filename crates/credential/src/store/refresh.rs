//! Per-credential refresh exclusion
//!
//! Concurrent readers that all observe an expiring credential must not all
//! hit the token endpoint: the first acquires the id's mutex and refreshes,
//! the rest wait and then observe the refreshed result. The map of mutexes
//! is bounded by the number of distinct credential ids seen.

use crate::core::CredentialId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Hands out one async mutex per credential id
#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    locks: Mutex<HashMap<CredentialId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex guarding refresh for the given id
    ///
    /// The inner guard is held only while handing out the Arc; callers await
    /// the returned mutex outside any synchronous lock.
    pub fn lock_for(&self, id: &CredentialId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_id_shares_a_mutex() {
        let coordinator = RefreshCoordinator::new();
        let id = CredentialId::new("svc").unwrap();

        let a = coordinator.lock_for(&id);
        let b = coordinator.lock_for(&id);
        assert!(Arc::ptr_eq(&a, &b));

        let _guard = a.lock().await;
        assert!(b.try_lock().is_err());
    }

    #[tokio::test]
    async fn test_distinct_ids_do_not_contend() {
        let coordinator = RefreshCoordinator::new();
        let a = coordinator.lock_for(&CredentialId::new("a").unwrap());
        let b = coordinator.lock_for(&CredentialId::new("b").unwrap());

        let _guard_a = a.lock().await;
        assert!(b.try_lock().is_ok());
    }
}
