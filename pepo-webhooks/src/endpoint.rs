//! Webhook endpoint records

use crate::{Result, WebhookError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    /// Receives deliveries
    Active,
    /// Registered but paused by the client
    Inactive,
    /// Soft deleted; revived on re-registration
    Deleted,
}

impl EndpointStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Deleted => "deleted",
        }
    }

    /// Parse a status supplied by a client. Only non-deleted states are accepted.
    pub fn parse_requested(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(WebhookError::InvalidStatus(raw.trim().to_string())),
        }
    }

    /// Whether the transition table allows moving to `next`.
    pub fn can_transition_to(&self, next: EndpointStatus) -> bool {
        use EndpointStatus::*;
        matches!(
            (self, next),
            (Active, Active)
                | (Active, Inactive)
                | (Inactive, Inactive)
                | (Inactive, Active)
                | (Active, Deleted)
                | (Inactive, Deleted)
                | (Deleted, Active)
                | (Deleted, Inactive)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition_to(&self, next: EndpointStatus) -> Result<EndpointStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(WebhookError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Whether deliveries may be made.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered webhook endpoint as persisted.
///
/// `secret` and `secret_salt` hold the sealed signing secret, never the
/// plaintext. During a rotation window the replaced secret stays available in
/// the `previous_*` fields so receivers can switch over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint identifier
    pub uuid: Uuid,

    /// Owning API client
    pub client_id: i64,

    /// Target URL for deliveries
    pub url: String,

    /// Signing secret encrypted with the data key
    pub secret: String,

    /// Data key wrapped by the master key
    pub secret_salt: String,

    /// Replaced secret still accepted during rotation
    pub previous_secret: Option<String>,

    /// Wrapped data key for `previous_secret`
    pub previous_secret_salt: Option<String>,

    /// End of the rotation window
    pub previous_secret_expires_at: Option<DateTime<Utc>>,

    /// Lifecycle state
    pub status: EndpointStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Create a new endpoint record around an already sealed secret.
    pub fn new(
        client_id: i64,
        url: impl Into<String>,
        secret: impl Into<String>,
        secret_salt: impl Into<String>,
        status: EndpointStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            client_id,
            url: url.into(),
            secret: secret.into(),
            secret_salt: secret_salt.into(),
            previous_secret: None,
            previous_secret_salt: None,
            previous_secret_expires_at: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the endpoint is soft deleted.
    pub fn is_deleted(&self) -> bool {
        self.status == EndpointStatus::Deleted
    }

    /// Sealed `(secret, secret_salt)` pairs valid at `now`, oldest first.
    pub fn sealed_secrets(&self, now: DateTime<Utc>) -> Vec<(&str, &str)> {
        let mut sealed = Vec::with_capacity(2);
        if let (Some(secret), Some(salt), Some(expires_at)) = (
            self.previous_secret.as_deref(),
            self.previous_secret_salt.as_deref(),
            self.previous_secret_expires_at,
        ) && expires_at > now
        {
            sealed.push((secret, salt));
        }
        sealed.push((self.secret.as_str(), self.secret_salt.as_str()));
        sealed
    }

    /// Public view returned to API callers.
    pub fn view(&self) -> EndpointView {
        EndpointView::from(self)
    }
}

/// Endpoint as exposed through the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointView {
    /// Endpoint uuid
    pub id: Uuid,

    /// Target URL
    pub url: String,

    /// Lifecycle state
    pub status: EndpointStatus,

    /// Last update, unix seconds
    pub updated_timestamp: i64,
}

impl From<&Endpoint> for EndpointView {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            id: endpoint.uuid,
            url: endpoint.url.clone(),
            status: endpoint.status,
            updated_timestamp: endpoint.updated_at.timestamp(),
        }
    }
}
