//! Subscription reconciliation
//!
//! A client declares the full set of topics an endpoint should receive. The
//! reconciler diffs that set against every stored row of the endpoint
//! (deleted ones included) and converges the table with as few writes as
//! possible: stale rows are deactivated, previously deleted rows are revived
//! and only genuinely new topics are inserted.

use crate::{
    EndpointRegistry, EndpointView, NewSubscription, Result, Subscription, SubscriptionStatus,
    TopicKey, TopicRequest, WebhookError, WebhookStore,
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Writes needed to converge an endpoint's subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Active rows no longer desired
    pub deactivate: Vec<i64>,

    /// Deleted rows desired again
    pub activate: Vec<i64>,

    /// Desired topics with no row at all
    pub insert: Vec<NewSubscription>,
}

impl ReconcilePlan {
    /// Whether the table already matches.
    pub fn is_empty(&self) -> bool {
        self.deactivate.is_empty() && self.activate.is_empty() && self.insert.is_empty()
    }
}

/// Three-way diff between stored rows and the desired topic set.
///
/// Active rows are matched first so a desired key consumes the live row rather
/// than reviving a deleted duplicate. Inserts keep the order of `desired`.
pub fn plan_reconciliation(
    client_id: i64,
    endpoint_uuid: Uuid,
    existing: &[Subscription],
    desired: &[TopicKey],
) -> ReconcilePlan {
    let mut remaining: HashSet<TopicKey> = desired.iter().copied().collect();

    let mut rows: Vec<&Subscription> = existing.iter().collect();
    rows.sort_by_key(|s| (!s.is_active(), s.id));

    let mut plan = ReconcilePlan::default();
    for row in rows {
        if remaining.remove(&row.key()) {
            if !row.is_active() {
                plan.activate.push(row.id);
            }
        } else if row.is_active() {
            plan.deactivate.push(row.id);
        }
    }

    let mut seen = HashSet::new();
    plan.insert = desired
        .iter()
        .filter(|key| remaining.contains(*key) && seen.insert(**key))
        .map(|key| NewSubscription {
            client_id,
            endpoint_uuid,
            topic_kind: key.topic_kind,
            content_entity_id: key.content_entity_id,
        })
        .collect();

    plan
}

/// Applies declared topic sets to the subscription table.
#[derive(Clone)]
pub struct SubscriptionReconciler {
    store: Arc<dyn WebhookStore>,
    registry: EndpointRegistry,
}

impl SubscriptionReconciler {
    pub fn new(store: Arc<dyn WebhookStore>, registry: EndpointRegistry) -> Self {
        Self { store, registry }
    }

    /// Make the endpoint's active subscriptions equal `desired`.
    ///
    /// Validation happens before any write; a rejected request leaves the
    /// table untouched. Repeating a call is a no-op.
    pub async fn sync_subscriptions(
        &self,
        client_id: i64,
        endpoint_uuid: Uuid,
        desired: &[TopicRequest],
    ) -> Result<EndpointView> {
        self.registry.active_client(client_id).await?;
        let keys = desired
            .iter()
            .map(TopicRequest::key)
            .collect::<Result<Vec<_>>>()?;

        let endpoint = self.registry.owned_endpoint(client_id, endpoint_uuid).await?;
        if !endpoint.status.is_active() {
            return Err(WebhookError::EndpointInactive(endpoint_uuid));
        }

        let existing = self.store.list_subscriptions(endpoint_uuid).await?;
        let plan = plan_reconciliation(client_id, endpoint_uuid, &existing, &keys);
        if plan.is_empty() {
            return Ok(endpoint.view());
        }

        let now = Utc::now();
        if !plan.deactivate.is_empty() {
            self.store
                .set_subscription_status(&plan.deactivate, SubscriptionStatus::Deleted, now)
                .await?;
        }
        if !plan.activate.is_empty() {
            self.store
                .set_subscription_status(&plan.activate, SubscriptionStatus::Active, now)
                .await?;
        }
        let inserted = plan.insert.len();
        if inserted > 0 {
            self.store.insert_subscriptions(plan.insert, now).await?;
        }

        info!(
            target: "webhook_subscriptions",
            client_id,
            endpoint_uuid = %endpoint_uuid,
            deactivated = plan.deactivate.len(),
            activated = plan.activate.len(),
            inserted,
            "reconciled subscriptions"
        );
        Ok(endpoint.view())
    }

    /// Alias of [`SubscriptionReconciler::sync_subscriptions`] matching the API
    /// operation name.
    pub async fn add_subscriptions(
        &self,
        client_id: i64,
        endpoint_uuid: Uuid,
        topics: &[TopicRequest],
    ) -> Result<EndpointView> {
        self.sync_subscriptions(client_id, endpoint_uuid, topics)
            .await
    }

    /// Active topics of an endpoint, sorted.
    pub async fn list_subscriptions(
        &self,
        client_id: i64,
        endpoint_uuid: Uuid,
    ) -> Result<Vec<TopicKey>> {
        self.registry.owned_endpoint(client_id, endpoint_uuid).await?;
        let mut keys: Vec<TopicKey> = self
            .store
            .list_subscriptions(endpoint_uuid)
            .await?
            .iter()
            .filter(|s| s.is_active())
            .map(Subscription::key)
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
