//! Shared fixtures for the webhook integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pepo_cache::InMemoryCache;
use pepo_webhooks::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;
use zeroize::Zeroizing;

pub const CLIENT: i64 = 42;
pub const OTHER_CLIENT: i64 = 43;
pub const INACTIVE_CLIENT: i64 = 44;

/// Alert sink that keeps every alert for inspection.
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn alert(&self, alert: Alert) {
        self.alerts.lock().await.push(alert);
    }
}

/// KMS whose unwrap can be switched off to simulate an outage.
pub struct FlakyKms {
    inner: LocalKms,
    pub down: AtomicBool,
}

impl FlakyKms {
    pub fn new() -> Self {
        Self {
            inner: LocalKms::ephemeral(),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyManagementService for FlakyKms {
    async fn generate_data_key(&self) -> Result<DataKey> {
        self.inner.generate_data_key().await
    }

    async fn decrypt_data_key(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(WebhookError::Vault("kms unreachable".to_string()));
        }
        self.inner.decrypt_data_key(ciphertext).await
    }
}

/// Store that delegates to [`InMemoryStore`] but can be told to reject event
/// inserts or to serve one outdated endpoint row.
pub struct FaultyStore {
    pub inner: InMemoryStore,
    pub fail_inserts: AtomicBool,
    stale_endpoint: std::sync::Mutex<Option<Endpoint>>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            stale_endpoint: std::sync::Mutex::new(None),
        }
    }

    /// Answer the next endpoint lookup with `endpoint` instead of the stored
    /// row.
    pub fn serve_stale_once(&self, endpoint: Endpoint) {
        *self.stale_endpoint.lock().unwrap() = Some(endpoint);
    }
}

#[async_trait]
impl WebhookStore for FaultyStore {
    async fn find_client(&self, client_id: i64) -> Result<Option<ApiClient>> {
        self.inner.find_client(client_id).await
    }

    async fn find_endpoint(&self, uuid: Uuid) -> Result<Option<Endpoint>> {
        let stale = self.stale_endpoint.lock().unwrap().take();
        if let Some(endpoint) = stale.filter(|e| e.uuid == uuid) {
            return Ok(Some(endpoint));
        }
        self.inner.find_endpoint(uuid).await
    }

    async fn find_endpoint_by_url(&self, client_id: i64, url: &str) -> Result<Option<Endpoint>> {
        self.inner.find_endpoint_by_url(client_id, url).await
    }

    async fn list_endpoints(&self, client_id: i64) -> Result<Vec<Endpoint>> {
        self.inner.list_endpoints(client_id).await
    }

    async fn insert_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        self.inner.insert_endpoint(endpoint).await
    }

    async fn update_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        self.inner.update_endpoint(endpoint).await
    }

    async fn list_subscriptions(&self, endpoint_uuid: Uuid) -> Result<Vec<Subscription>> {
        self.inner.list_subscriptions(endpoint_uuid).await
    }

    async fn set_subscription_status(
        &self,
        ids: &[i64],
        status: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.inner.set_subscription_status(ids, status, now).await
    }

    async fn insert_subscriptions(
        &self,
        rows: Vec<NewSubscription>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        self.inner.insert_subscriptions(rows, now).await
    }

    async fn subscribed_endpoints_page(
        &self,
        topic_kind: TopicKind,
        entity_ids: &[i64],
        after: Option<&EndpointRef>,
        limit: usize,
    ) -> Result<Vec<EndpointRef>> {
        self.inner
            .subscribed_endpoints_page(topic_kind, entity_ids, after, limit)
            .await
    }

    async fn insert_events(&self, events: Vec<Event>) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(WebhookError::Store("events table unavailable".to_string()));
        }
        self.inner.insert_events(events).await
    }

    async fn find_event(&self, uuid: Uuid) -> Result<Option<Event>> {
        self.inner.find_event(uuid).await
    }

    async fn due_events(
        &self,
        now: DateTime<Utc>,
        lease_timeout: Duration,
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.inner.due_events(now, lease_timeout, limit).await
    }

    async fn claim_event(
        &self,
        uuid: Uuid,
        lock_id: &str,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> Result<Option<Event>> {
        self.inner.claim_event(uuid, lock_id, now, lease_timeout).await
    }

    async fn complete_event(
        &self,
        uuid: Uuid,
        lock_id: &str,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.complete_event(uuid, lock_id, update, now).await
    }
}

/// Services over in-memory collaborators.
pub struct Harness {
    pub store: InMemoryStore,
    pub cache: InMemoryCache,
    pub kms: Arc<FlakyKms>,
    pub alerts: Arc<RecordingAlertSink>,
    pub services: WebhookServices,
}

/// Configuration suitable for talking to a local wiremock server.
pub fn test_config() -> WebhookConfig {
    WebhookConfig::builder()
        .allow_http(true)
        .timeout(std::time::Duration::from_secs(2))
        .lease_timeout(std::time::Duration::from_secs(30))
        .retry_policy(RetryPolicy::fixed(3, std::time::Duration::from_secs(10)))
        .max_internal_errors(2)
        .poll_interval(std::time::Duration::from_millis(20))
        .build()
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: WebhookConfig) -> Harness {
    let store = InMemoryStore::new();
    store.upsert_client(CLIENT, ClientStatus::Active).await;
    store.upsert_client(OTHER_CLIENT, ClientStatus::Active).await;
    store.upsert_client(INACTIVE_CLIENT, ClientStatus::Inactive).await;

    let cache = InMemoryCache::new();
    let kms = Arc::new(FlakyKms::new());
    let alerts = Arc::new(RecordingAlertSink::default());

    let services = WebhookServices::with_alerts(
        config,
        Arc::new(store.clone()),
        Arc::new(cache.clone()),
        kms.clone(),
        alerts.clone(),
    )
    .unwrap();

    Harness {
        store,
        cache,
        kms,
        alerts,
        services,
    }
}

pub fn tag(kind_id: i64) -> TopicRequest {
    TopicRequest::new("tag_video", kind_id)
}

pub fn video_change(video_id: i64) -> ContentChange {
    ContentChange::new(
        video_id,
        ChangeAction::Updated,
        serde_json::json!({"title": format!("video {video_id}")}),
    )
}

/// A point in time after every retry of the test policy has become due.
pub fn later(steps: i64) -> DateTime<Utc> {
    Utc::now() + Duration::minutes(5 * steps)
}
