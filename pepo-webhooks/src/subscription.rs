//! Topic subscriptions of an endpoint

use crate::{Result, TopicKind, WebhookError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a subscription row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Deleted,
}

impl SubscriptionStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    /// Whether the transition table allows moving to `next`.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        *self != next
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a subscription within one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    pub topic_kind: TopicKind,
    pub content_entity_id: i64,
}

impl TopicKey {
    pub fn new(topic_kind: TopicKind, content_entity_id: i64) -> Self {
        Self {
            topic_kind,
            content_entity_id,
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.topic_kind, self.content_entity_id)
    }
}

/// A persisted subscription row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Row id assigned by the store
    pub id: i64,
    pub client_id: i64,
    pub endpoint_uuid: Uuid,
    pub topic_kind: TopicKind,
    pub content_entity_id: i64,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Composite key of the row.
    pub fn key(&self) -> TopicKey {
        TopicKey::new(self.topic_kind, self.content_entity_id)
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Subscription row to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub client_id: i64,
    pub endpoint_uuid: Uuid,
    pub topic_kind: TopicKind,
    pub content_entity_id: i64,
}

impl NewSubscription {
    pub fn key(&self) -> TopicKey {
        TopicKey::new(self.topic_kind, self.content_entity_id)
    }
}

/// A topic as requested by an API client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRequest {
    /// Topic kind name, case-insensitive
    pub topic_kind: String,

    /// Content entity id scoped by the kind
    pub kind_id: i64,
}

impl TopicRequest {
    pub fn new(topic_kind: impl Into<String>, kind_id: i64) -> Self {
        Self {
            topic_kind: topic_kind.into(),
            kind_id,
        }
    }

    /// Normalise into a [`TopicKey`].
    pub fn key(&self) -> Result<TopicKey> {
        let kind = TopicKind::parse(&self.topic_kind)?;
        if self.kind_id <= 0 {
            return Err(WebhookError::Validation(format!(
                "kind_id must be positive, got {}",
                self.kind_id
            )));
        }
        Ok(TopicKey::new(kind, self.kind_id))
    }
}
