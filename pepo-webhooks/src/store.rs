//! Relational store boundary
//!
//! The components never talk to a database directly. They go through
//! [`WebhookStore`], which exposes exactly the reads and writes the subsystem
//! needs. Conditional writes (`claim_event`, `complete_event`) must be atomic in
//! every implementation; the dispatcher relies on them for mutual exclusion
//! between workers.

use crate::{
    Endpoint, EndpointStatus, Event, EventUpdate, NewSubscription, Result, Subscription,
    SubscriptionStatus, TopicKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an API client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Inactive,
}

/// An API client, read-only for this subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiClient {
    pub id: i64,
    pub status: ClientStatus,
}

impl ApiClient {
    pub fn is_active(&self) -> bool {
        self.status == ClientStatus::Active
    }
}

/// A `(client_id, endpoint_uuid)` pair, ordered the way fan-out pages them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointRef {
    pub client_id: i64,
    pub endpoint_uuid: Uuid,
}

impl EndpointRef {
    pub fn new(client_id: i64, endpoint_uuid: Uuid) -> Self {
        Self {
            client_id,
            endpoint_uuid,
        }
    }
}

/// Persistence operations used by the webhook components.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Look up an API client.
    async fn find_client(&self, client_id: i64) -> Result<Option<ApiClient>>;

    /// Look up an endpoint by uuid, including soft-deleted rows.
    async fn find_endpoint(&self, uuid: Uuid) -> Result<Option<Endpoint>>;

    /// Look up the single row for `(client_id, url)`, including soft-deleted rows.
    async fn find_endpoint_by_url(&self, client_id: i64, url: &str) -> Result<Option<Endpoint>>;

    /// Non-deleted endpoints of a client, oldest first.
    async fn list_endpoints(&self, client_id: i64) -> Result<Vec<Endpoint>>;

    /// Insert a new endpoint. Fails if a row for `(client_id, url)` exists.
    async fn insert_endpoint(&self, endpoint: Endpoint) -> Result<()>;

    /// Replace an existing endpoint row.
    async fn update_endpoint(&self, endpoint: Endpoint) -> Result<()>;

    /// Every subscription row of an endpoint, including deleted ones.
    async fn list_subscriptions(&self, endpoint_uuid: Uuid) -> Result<Vec<Subscription>>;

    /// Set the status of the given rows in one batch. Rows the transition
    /// table does not allow (already in `status`) are left alone and not
    /// counted.
    async fn set_subscription_status(
        &self,
        ids: &[i64],
        status: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Insert active subscriptions in one batch. Fails if any would duplicate a
    /// live row.
    async fn insert_subscriptions(
        &self,
        rows: Vec<NewSubscription>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>>;

    /// Distinct `(client_id, endpoint_uuid)` pairs with an active subscription
    /// of `topic_kind` to any of `entity_ids`, ordered ascending, strictly after
    /// `after`, at most `limit`.
    async fn subscribed_endpoints_page(
        &self,
        topic_kind: TopicKind,
        entity_ids: &[i64],
        after: Option<&EndpointRef>,
        limit: usize,
    ) -> Result<Vec<EndpointRef>>;

    /// Insert events in one batch; all or nothing.
    async fn insert_events(&self, events: Vec<Event>) -> Result<()>;

    /// Look up an event.
    async fn find_event(&self, uuid: Uuid) -> Result<Option<Event>>;

    /// Events that may be claimed at `now`: queued and due, or in flight with
    /// a claim older than `lease_timeout`. Ordered by `execute_at`.
    async fn due_events(
        &self,
        now: DateTime<Utc>,
        lease_timeout: Duration,
        limit: usize,
    ) -> Result<Vec<Event>>;

    /// Claim an event if it is still due. Returns the claimed row, or `None`
    /// when another worker got there first. Taking over an expired claim
    /// increments `internal_error_count`.
    async fn claim_event(
        &self,
        uuid: Uuid,
        lock_id: &str,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> Result<Option<Event>>;

    /// Write a completion if `lock_id` still holds the claim. Returns whether
    /// the write happened.
    async fn complete_event(
        &self,
        uuid: Uuid,
        lock_id: &str,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Statuses an endpoint may be in to be listed.
pub(crate) fn is_listed(status: EndpointStatus) -> bool {
    status != EndpointStatus::Deleted
}
