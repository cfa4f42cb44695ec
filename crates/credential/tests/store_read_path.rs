//! Integration tests for the store's read path: template resolution,
//! default-key selection, cache coherence, and refresh coordination.

use async_trait::async_trait;
use chrono::Utc;
use hive_credential::prelude::*;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Provider whose refresh installs a one-hour token and counts invocations
struct CountingProvider {
    refreshes: AtomicUsize,
}

impl CountingProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            refreshes: AtomicUsize::new(0),
        })
    }

    fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for CountingProvider {
    fn provider_id(&self) -> &str {
        "counting"
    }

    fn supported_kinds(&self) -> &[CredentialKind] {
        &[CredentialKind::OAuth2, CredentialKind::BearerToken]
    }

    async fn refresh(&self, credential: &mut CredentialObject) -> Result<(), CredentialError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        // Simulate a slow token endpoint so concurrent readers really race
        tokio::time::sleep(Duration::from_millis(25)).await;
        let count = self.refreshes.load(Ordering::SeqCst);
        credential.set_key(
            "access_token",
            CredentialKey::new(format!("refreshed_{count}"))
                .with_expiry(Utc::now() + chrono::Duration::hours(1)),
        );
        credential.mark_refreshed();
        Ok(())
    }

    async fn validate(&self, credential: &CredentialObject) -> bool {
        !credential.needs_refresh()
    }
}

fn store_with_memory() -> CredentialStore {
    CredentialStore::builder()
        .storage(Arc::new(MemoryBackend::new()))
        .build()
}

fn id(s: &str) -> CredentialId {
    CredentialId::new(s).unwrap()
}

/// An expiring credential bound to the counting provider
fn expiring_credential(credential_id: &str) -> CredentialObject {
    let mut credential = CredentialObject::new(id(credential_id), CredentialKind::OAuth2);
    credential.provider_id = Some("counting".into());
    credential.auto_refresh = true;
    credential.set_key(
        "access_token",
        CredentialKey::new("stale").with_expiry(Utc::now() + chrono::Duration::minutes(2)),
    );
    credential
}

#[tokio::test]
async fn test_resolve_exact_key() {
    let store = store_with_memory();
    let mut credential = CredentialObject::new(id("github_oauth"), CredentialKind::OAuth2);
    credential.set_key("access_token", CredentialKey::new("ghp_123"));
    store.save_credential(&credential).await.unwrap();

    let resolved = store
        .resolve("Bearer {{github_oauth.access_token}}", true)
        .await
        .unwrap();
    assert_eq!(resolved, "Bearer ghp_123");
}

#[tokio::test]
async fn test_resolve_headers_preserves_keys() {
    let store = store_with_memory();
    let mut credential = CredentialObject::new(id("github_oauth"), CredentialKind::OAuth2);
    credential.set_key("access_token", CredentialKey::new("ghp_123"));
    store.save_credential(&credential).await.unwrap();

    let headers = HashMap::from([(
        "Authorization".to_string(),
        "Bearer {{github_oauth.access_token}}".to_string(),
    )]);
    let resolved = store.resolve_headers(&headers).await.unwrap();
    assert_eq!(
        resolved,
        HashMap::from([("Authorization".to_string(), "Bearer ghp_123".to_string())])
    );
}

#[tokio::test]
async fn test_default_key_selection_order() {
    let store = store_with_memory();

    // Only a custom key: first-inserted wins
    let mut credential = CredentialObject::new(id("svc"), CredentialKind::Custom);
    credential.set_key("token_a", CredentialKey::new("A"));
    credential.set_key("token_b", CredentialKey::new("B"));
    store.save_credential(&credential).await.unwrap();
    assert_eq!(store.resolve("{{svc}}", true).await.unwrap(), "A");

    // access_token outranks insertion order
    credential.set_key("access_token", CredentialKey::new("AT"));
    store.save_credential(&credential).await.unwrap();
    assert_eq!(store.resolve("{{svc}}", true).await.unwrap(), "AT");

    // api_key outranks access_token
    credential.set_key("api_key", CredentialKey::new("AK"));
    store.save_credential(&credential).await.unwrap();
    assert_eq!(store.resolve("{{svc}}", true).await.unwrap(), "AK");

    // value outranks everything
    credential.set_key("value", CredentialKey::new("V"));
    store.save_credential(&credential).await.unwrap();
    assert_eq!(store.resolve("{{svc}}", true).await.unwrap(), "V");
}

#[tokio::test]
async fn test_default_key_on_empty_credential_fails() {
    let store = store_with_memory();
    let credential = CredentialObject::new(id("empty"), CredentialKind::Custom);
    store.save_credential(&credential).await.unwrap();

    assert!(matches!(
        store.resolve("{{empty}}", true).await,
        Err(CredentialError::KeyNotFound { .. })
    ));
    assert!(matches!(
        store.get(&id("empty")).await,
        Err(CredentialError::KeyNotFound { .. })
    ));
}

#[tokio::test]
async fn test_missing_credential_policy() {
    let store = store_with_memory();

    // fail_on_missing: distinct NotFound error
    let strict = store.resolve("{{stripe.key}}", true).await;
    assert!(matches!(strict, Err(CredentialError::NotFound { .. })));

    // tolerant: reference text left verbatim
    let lenient = store.resolve("{{stripe.key}}", false).await.unwrap();
    assert_eq!(lenient, "{{stripe.key}}");
}

#[tokio::test]
async fn test_missing_key_always_fails() {
    let store = store_with_memory();
    let mut credential = CredentialObject::new(id("svc"), CredentialKind::Custom);
    credential.set_key("present", CredentialKey::new("v"));
    store.save_credential(&credential).await.unwrap();

    for fail_on_missing in [true, false] {
        let result = store.resolve("{{svc.absent}}", fail_on_missing).await;
        assert!(
            matches!(result, Err(CredentialError::KeyNotFound { .. })),
            "missing key must fail regardless of fail_on_missing"
        );
    }
}

#[tokio::test]
async fn test_get_key_and_get() {
    let store = store_with_memory();
    store
        .save_credential(&CredentialObject::api_key(id("brave_search"), "BSA_X"))
        .await
        .unwrap();

    store
        .get_key(&id("brave_search"), "api_key")
        .await
        .unwrap()
        .unwrap()
        .expose_secret(|s| assert_eq!(s, "BSA_X"));

    store
        .get(&id("brave_search"))
        .await
        .unwrap()
        .unwrap()
        .expose_secret(|s| assert_eq!(s, "BSA_X"));

    assert!(
        store
            .get_key(&id("brave_search"), "absent")
            .await
            .unwrap()
            .is_none()
    );
    assert!(store.get(&id("nope")).await.unwrap().is_none());
}

/// Cache coherence: a save with a cached id must be visible to the next read
#[tokio::test]
async fn test_save_invalidates_cached_entry() {
    let store = store_with_memory();

    store
        .save_credential(&CredentialObject::api_key(id("svc"), "v1"))
        .await
        .unwrap();
    // Warm the cache
    store.get_credential(&id("svc"), false).await.unwrap();

    store
        .save_credential(&CredentialObject::api_key(id("svc"), "v2"))
        .await
        .unwrap();

    let credential = store.get_credential(&id("svc"), false).await.unwrap().unwrap();
    credential
        .get_key("api_key")
        .unwrap()
        .value
        .expose_secret(|s| assert_eq!(s, "v2"));
}

#[tokio::test]
async fn test_delete_is_observed() {
    let store = store_with_memory();
    store
        .save_credential(&CredentialObject::api_key(id("svc"), "v"))
        .await
        .unwrap();
    assert!(store.is_available(&id("svc")).await);

    assert!(store.delete_credential(&id("svc")).await.unwrap());
    assert!(!store.delete_credential(&id("svc")).await.unwrap());
    assert!(store.get_credential(&id("svc"), false).await.unwrap().is_none());
    assert!(!store.is_available(&id("svc")).await);
}

/// A single read of an expiring credential triggers exactly one refresh,
/// and a follow-up read within TTL triggers none
#[tokio::test]
async fn test_auto_refresh_once_then_cached() {
    let provider = CountingProvider::new();
    let store = CredentialStore::builder()
        .storage(Arc::new(MemoryBackend::new()))
        .provider(provider.clone())
        .build();

    store
        .save_credential(&expiring_credential("github_oauth"))
        .await
        .unwrap();

    let refreshed = store
        .get_credential(&id("github_oauth"), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(provider.refresh_count(), 1);
    refreshed
        .get_key("access_token")
        .unwrap()
        .value
        .expose_secret(|s| assert_eq!(s, "refreshed_1"));
    assert!(refreshed.last_refreshed.is_some());

    // Within TTL the refreshed copy is served from cache
    store
        .get_credential(&id("github_oauth"), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(provider.refresh_count(), 1);
}

/// Concurrent readers of an expired credential trigger exactly one refresh
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_concurrent_refresh() {
    let provider = CountingProvider::new();
    let store = CredentialStore::builder()
        .storage(Arc::new(MemoryBackend::new()))
        .provider(provider.clone())
        .build();

    store
        .save_credential(&expiring_credential("github_oauth"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.get_credential(&id("github_oauth"), true).await
        }));
    }

    for handle in handles {
        let credential = handle.await.unwrap().unwrap().unwrap();
        // Every reader observes the single refreshed value
        credential
            .get_key("access_token")
            .unwrap()
            .value
            .expose_secret(|s| assert_eq!(s, "refreshed_1"));
    }
    assert_eq!(provider.refresh_count(), 1);
}

#[tokio::test]
async fn test_refresh_skipped_without_request_or_flag() {
    let provider = CountingProvider::new();
    let store = CredentialStore::builder()
        .storage(Arc::new(MemoryBackend::new()))
        .provider(provider.clone())
        .build();

    store
        .save_credential(&expiring_credential("github_oauth"))
        .await
        .unwrap();

    // refresh_if_needed = false: no refresh
    store
        .get_credential(&id("github_oauth"), false)
        .await
        .unwrap();
    assert_eq!(provider.refresh_count(), 0);

    // auto_refresh disabled on the credential: no refresh either
    let mut manual = expiring_credential("manual_oauth");
    manual.auto_refresh = false;
    store.save_credential(&manual).await.unwrap();
    store
        .get_credential(&id("manual_oauth"), true)
        .await
        .unwrap();
    assert_eq!(provider.refresh_count(), 0);
}

#[tokio::test]
async fn test_usage_spec_registration_and_resolution() {
    let store = store_with_memory();
    let mut credential = CredentialObject::new(id("github_oauth"), CredentialKind::OAuth2);
    credential.set_key("access_token", CredentialKey::new("ghp_123"));
    store.save_credential(&credential).await.unwrap();

    let spec = CredentialUsageSpec::new(id("github_oauth"))
        .with_required_key("access_token")
        .with_required_key("refresh_token")
        .with_header("Authorization", "Bearer {{github_oauth.access_token}}");
    store.register_usage(spec).unwrap();

    let headers = store.resolve_for_usage(&id("github_oauth")).await.unwrap();
    assert_eq!(
        headers.get("Authorization").map(String::as_str),
        Some("Bearer ghp_123")
    );

    // refresh_token is declared required but absent from the credential
    let missing = store.validate_for_usage(&id("github_oauth")).await.unwrap();
    assert_eq!(missing, vec!["refresh_token"]);
}

#[tokio::test]
async fn test_usage_spec_errors() {
    let store = store_with_memory();

    // No spec registered
    assert!(matches!(
        store.resolve_for_usage(&id("unknown")).await,
        Err(CredentialError::Validation { .. })
    ));
    assert!(matches!(
        store.validate_for_usage(&id("unknown")).await,
        Err(CredentialError::Validation { .. })
    ));

    // Malformed template syntax is rejected at registration
    let bad = CredentialUsageSpec::new(id("svc")).with_header("X-Bad", "{{svc key}}");
    assert!(matches!(
        store.register_usage(bad),
        Err(CredentialError::Validation { .. })
    ));

    // Spec registered but credential absent
    let spec = CredentialUsageSpec::new(id("svc")).with_required_key("api_key");
    store.register_usage(spec).unwrap();
    assert!(matches!(
        store.validate_for_usage(&id("svc")).await,
        Err(CredentialError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_repeated_references_observe_one_snapshot() {
    let store = store_with_memory();
    let mut credential = CredentialObject::new(id("svc"), CredentialKind::Custom);
    credential.set_key("value", CredentialKey::new("same"));
    store.save_credential(&credential).await.unwrap();

    let resolved = store
        .resolve("{{svc}} {{svc.value}} {{svc}}", true)
        .await
        .unwrap();
    assert_eq!(resolved, "same same same");
}

#[tokio::test]
async fn test_list_credentials_delegates_to_storage() {
    let store = store_with_memory();
    store
        .save_credential(&CredentialObject::api_key(id("b_svc"), "2"))
        .await
        .unwrap();
    store
        .save_credential(&CredentialObject::api_key(id("a_svc"), "1"))
        .await
        .unwrap();

    let ids = store.list_credentials().await.unwrap();
    assert_eq!(ids, vec![id("a_svc"), id("b_svc")]);
}
