//! In-process store used for tests and local development.

use crate::store::is_listed;
use crate::{
    ApiClient, ClientStatus, Endpoint, EndpointRef, Event, EventUpdate, NewSubscription, Result,
    Subscription, SubscriptionStatus, TopicKind, WebhookError, WebhookStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    clients: HashMap<i64, ApiClient>,
    endpoints: HashMap<Uuid, Endpoint>,
    subscriptions: Vec<Subscription>,
    next_subscription_id: i64,
    events: Vec<Event>,
}

/// [`WebhookStore`] keeping every table in memory.
///
/// All tables sit behind one lock, so every operation (claims included) is
/// atomic with respect to the others.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an API client.
    pub async fn upsert_client(&self, id: i64, status: ClientStatus) {
        let mut tables = self.tables.write().await;
        tables.clients.insert(id, ApiClient { id, status });
    }

    /// Snapshot of every event row.
    pub async fn events(&self) -> Vec<Event> {
        self.tables.read().await.events.clone()
    }

    /// Snapshot of every subscription row.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.tables.read().await.subscriptions.clone()
    }

    /// Snapshot of every endpoint row, including deleted ones.
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        let tables = self.tables.read().await;
        let mut endpoints: Vec<_> = tables.endpoints.values().cloned().collect();
        endpoints.sort_by_key(|e| e.created_at);
        endpoints
    }
}

#[async_trait]
impl WebhookStore for InMemoryStore {
    async fn find_client(&self, client_id: i64) -> Result<Option<ApiClient>> {
        Ok(self.tables.read().await.clients.get(&client_id).cloned())
    }

    async fn find_endpoint(&self, uuid: Uuid) -> Result<Option<Endpoint>> {
        Ok(self.tables.read().await.endpoints.get(&uuid).cloned())
    }

    async fn find_endpoint_by_url(&self, client_id: i64, url: &str) -> Result<Option<Endpoint>> {
        let tables = self.tables.read().await;
        Ok(tables
            .endpoints
            .values()
            .find(|e| e.client_id == client_id && e.url == url)
            .cloned())
    }

    async fn list_endpoints(&self, client_id: i64) -> Result<Vec<Endpoint>> {
        let tables = self.tables.read().await;
        let mut endpoints: Vec<_> = tables
            .endpoints
            .values()
            .filter(|e| e.client_id == client_id && is_listed(e.status))
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| (e.created_at, e.uuid));
        Ok(endpoints)
    }

    async fn insert_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        let mut tables = self.tables.write().await;
        let duplicate = tables.endpoints.contains_key(&endpoint.uuid)
            || tables
                .endpoints
                .values()
                .any(|e| e.client_id == endpoint.client_id && e.url == endpoint.url);
        if duplicate {
            return Err(WebhookError::Store(format!(
                "unique violation on endpoint ({}, {})",
                endpoint.client_id, endpoint.url
            )));
        }
        tables.endpoints.insert(endpoint.uuid, endpoint);
        Ok(())
    }

    async fn update_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.endpoints.get_mut(&endpoint.uuid) {
            Some(row) => {
                *row = endpoint;
                Ok(())
            }
            None => Err(WebhookError::EndpointNotFound(endpoint.uuid)),
        }
    }

    async fn list_subscriptions(&self, endpoint_uuid: Uuid) -> Result<Vec<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .iter()
            .filter(|s| s.endpoint_uuid == endpoint_uuid)
            .cloned()
            .collect())
    }

    async fn set_subscription_status(
        &self,
        ids: &[i64],
        status: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let ids: HashSet<i64> = ids.iter().copied().collect();
        let mut tables = self.tables.write().await;

        if status == SubscriptionStatus::Active {
            // Reviving must not produce two live rows with one identity.
            let reviving: Vec<_> = tables
                .subscriptions
                .iter()
                .filter(|s| ids.contains(&s.id))
                .map(|s| (s.endpoint_uuid, s.key()))
                .collect();
            let conflict = tables.subscriptions.iter().any(|s| {
                s.is_active()
                    && !ids.contains(&s.id)
                    && reviving.contains(&(s.endpoint_uuid, s.key()))
            });
            if conflict {
                return Err(WebhookError::Store(
                    "unique violation on active subscription".to_string(),
                ));
            }
        }

        let mut updated = 0;
        for row in tables
            .subscriptions
            .iter_mut()
            .filter(|s| ids.contains(&s.id) && s.status.can_transition_to(status))
        {
            row.status = status;
            row.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn insert_subscriptions(
        &self,
        rows: Vec<NewSubscription>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        let mut tables = self.tables.write().await;

        let mut seen = HashSet::new();
        for row in &rows {
            let identity = (row.endpoint_uuid, row.key());
            let live = tables
                .subscriptions
                .iter()
                .any(|s| s.is_active() && (s.endpoint_uuid, s.key()) == identity);
            if live || !seen.insert(identity) {
                return Err(WebhookError::Store(format!(
                    "unique violation on subscription {}",
                    row.key()
                )));
            }
        }

        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            tables.next_subscription_id += 1;
            let subscription = Subscription {
                id: tables.next_subscription_id,
                client_id: row.client_id,
                endpoint_uuid: row.endpoint_uuid,
                topic_kind: row.topic_kind,
                content_entity_id: row.content_entity_id,
                status: SubscriptionStatus::Active,
                created_at: now,
                updated_at: now,
            };
            tables.subscriptions.push(subscription.clone());
            inserted.push(subscription);
        }
        Ok(inserted)
    }

    async fn subscribed_endpoints_page(
        &self,
        topic_kind: TopicKind,
        entity_ids: &[i64],
        after: Option<&EndpointRef>,
        limit: usize,
    ) -> Result<Vec<EndpointRef>> {
        let tables = self.tables.read().await;
        let distinct: BTreeSet<EndpointRef> = tables
            .subscriptions
            .iter()
            .filter(|s| {
                s.is_active()
                    && s.topic_kind == topic_kind
                    && entity_ids.contains(&s.content_entity_id)
            })
            .map(|s| EndpointRef::new(s.client_id, s.endpoint_uuid))
            .filter(|r| after.is_none_or(|after| r > after))
            .collect();
        Ok(distinct.into_iter().take(limit).collect())
    }

    async fn insert_events(&self, events: Vec<Event>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut seen = HashSet::new();
        for event in &events {
            if !seen.insert(event.uuid) || tables.events.iter().any(|e| e.uuid == event.uuid) {
                return Err(WebhookError::Store(format!(
                    "unique violation on event {}",
                    event.uuid
                )));
            }
        }
        tables.events.extend(events);
        Ok(())
    }

    async fn find_event(&self, uuid: Uuid) -> Result<Option<Event>> {
        let tables = self.tables.read().await;
        Ok(tables.events.iter().find(|e| e.uuid == uuid).cloned())
    }

    async fn due_events(
        &self,
        now: DateTime<Utc>,
        lease_timeout: Duration,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let tables = self.tables.read().await;
        let mut due: Vec<_> = tables
            .events
            .iter()
            .filter(|e| e.is_due(now, lease_timeout))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.execute_at, e.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_event(
        &self,
        uuid: Uuid,
        lock_id: &str,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> Result<Option<Event>> {
        let mut tables = self.tables.write().await;
        let Some(event) = tables.events.iter_mut().find(|e| e.uuid == uuid) else {
            return Ok(None);
        };
        if !event.is_due(now, lease_timeout) {
            return Ok(None);
        }
        event.claim(lock_id, now);
        Ok(Some(event.clone()))
    }

    async fn complete_event(
        &self,
        uuid: Uuid,
        lock_id: &str,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(event) = tables.events.iter_mut().find(|e| e.uuid == uuid) else {
            return Ok(false);
        };
        if event.lock_id.as_deref() != Some(lock_id)
            || !event.status.can_transition_to(update.status())
        {
            return Ok(false);
        }
        event.apply(&update, now);
        Ok(true)
    }
}
