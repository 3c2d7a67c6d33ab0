//! Endpoint registration through the public services.

mod common;

use common::*;
use pepo_cache::{CacheStore, InMemoryCache};
use pepo_webhooks::*;
use std::sync::Arc;

#[tokio::test]
async fn test_register_then_reregister_same_url() {
    let h = harness().await;
    let registry = &h.services.registry;

    let first = registry
        .add_endpoint(CLIENT, "https://hooks.example.com/a", None)
        .await
        .unwrap();
    let err = registry
        .add_endpoint(CLIENT, "https://hooks.example.com/a", None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "endpoint_already_present");
    assert!(!err.is_retryable());
    assert_eq!(h.store.endpoints().await.len(), 1);

    registry.delete_endpoint(CLIENT, first.id).await.unwrap();
    let revived = registry
        .add_endpoint(CLIENT, "https://hooks.example.com/a", Some("ACTIVE"))
        .await
        .unwrap();

    assert_eq!(revived.id, first.id);
    assert_eq!(revived.status, EndpointStatus::Active);
    assert_eq!(h.store.endpoints().await.len(), 1);
}

#[tokio::test]
async fn test_same_url_for_different_clients() {
    let h = harness().await;
    let registry = &h.services.registry;

    let a = registry
        .add_endpoint(CLIENT, "https://shared.example.com", None)
        .await
        .unwrap();
    let b = registry
        .add_endpoint(OTHER_CLIENT, "https://shared.example.com", None)
        .await
        .unwrap();

    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn test_secret_never_stored_in_plaintext() {
    let h = harness().await;
    let view = h
        .services
        .registry
        .add_endpoint(CLIENT, "https://hooks.example.com/secret", None)
        .await
        .unwrap();

    let secrets = h
        .services
        .registry
        .secret_for_receiver(CLIENT, view.id)
        .await
        .unwrap();
    let row = h.store.find_endpoint(view.id).await.unwrap().unwrap();
    let serialized = serde_json::to_string(&row).unwrap();

    assert_eq!(secrets.len(), 1);
    assert!(!serialized.contains(&secrets[0]));
}

#[tokio::test]
async fn test_secret_unavailable_when_vault_down() {
    let h = harness().await;
    let view = h
        .services
        .registry
        .add_endpoint(CLIENT, "https://hooks.example.com/v", None)
        .await
        .unwrap();

    h.kms.set_down(true);
    let err = h
        .services
        .registry
        .secret_for_receiver(CLIENT, view.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "vault_error");
}

#[tokio::test]
async fn test_view_serializes_for_api() {
    let h = harness().await;
    let view = h
        .services
        .registry
        .add_endpoint(CLIENT, "https://hooks.example.com/json", Some("inactive"))
        .await
        .unwrap();

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["url"], "https://hooks.example.com/json");
    assert_eq!(json["status"], "inactive");
    assert!(json["updatedTimestamp"].is_i64());
}

#[tokio::test]
async fn test_inactive_client_is_rejected_everywhere() {
    let h = harness().await;
    let registry = &h.services.registry;

    let err = registry
        .add_endpoint(INACTIVE_CLIENT, "https://hooks.example.com", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "client_inactive");

    let err = registry.list_endpoints(INACTIVE_CLIENT).await.unwrap_err();
    assert_eq!(err.code(), "client_inactive");
}

#[tokio::test]
async fn test_outdated_read_is_not_left_in_cache() {
    let h = harness().await;
    let view = h
        .services
        .registry
        .add_endpoint(CLIENT, "https://hooks.example.com/race", None)
        .await
        .unwrap();
    let before = h.store.find_endpoint(view.id).await.unwrap().unwrap();

    let store = Arc::new(FaultyStore::new(h.store.clone()));
    let cache = InMemoryCache::new();
    let services = WebhookServices::with_alerts(
        test_config(),
        store.clone(),
        Arc::new(cache.clone()),
        h.kms.clone(),
        Arc::new(RecordingAlertSink::default()),
    )
    .unwrap();

    // The status change commits while a reader still holds the old row.
    services
        .registry
        .update_endpoint_status(CLIENT, view.id, "inactive")
        .await
        .unwrap();
    store.serve_stale_once(before);

    let found = services.registry.find_endpoint(view.id).await.unwrap().unwrap();
    assert_eq!(found.status, EndpointStatus::Inactive);
    assert!(!cache.exists(&endpoint_cache_key(view.id)).await.unwrap());

    // The next read fills the cache with the current row.
    let found = services.registry.find_endpoint(view.id).await.unwrap().unwrap();
    assert_eq!(found.status, EndpointStatus::Inactive);
    assert!(cache.exists(&endpoint_cache_key(view.id)).await.unwrap());
}
