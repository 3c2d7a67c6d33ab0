//! Delivery tasks produced by fan-out

use crate::TopicKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum stored length of a receiver response body.
pub const MAX_STORED_BODY_LEN: usize = 1024;

/// Status of a delivery task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting for `execute_at`
    Queued,

    /// Claimed by a dispatcher
    InFlight,

    /// Receiver acknowledged with 2xx
    Delivered,

    /// Permanently failed (no more retries)
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Check if the event is complete (success or permanent failure)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Whether the transition table allows moving to `next`.
    ///
    /// `in_flight -> in_flight` is the reclaim of an expired lease.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (Queued, InFlight)
                | (InFlight, InFlight)
                | (InFlight, Queued)
                | (InFlight, Delivered)
                | (InFlight, Failed)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery task for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uuid: Uuid,
    pub client_id: i64,
    pub endpoint_uuid: Uuid,
    pub topic_kind: TopicKind,

    /// Body posted to the receiver
    pub extra_data: serde_json::Value,

    pub status: EventStatus,

    /// Not delivered before this instant
    pub execute_at: DateTime<Utc>,

    /// Failed delivery attempts
    pub retry_count: u32,

    /// Local failures (vault, payload) while preparing a delivery
    pub internal_error_count: u32,

    /// Token of the dispatcher holding the claim
    pub lock_id: Option<String>,

    /// Start of the current claim
    pub locked_at: Option<DateTime<Utc>>,

    /// JSON-encoded [`ErrorResponse`] of the last failure
    pub error_response: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Create a queued event.
    pub fn queued(
        client_id: i64,
        endpoint_uuid: Uuid,
        topic_kind: TopicKind,
        extra_data: serde_json::Value,
        execute_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            client_id,
            endpoint_uuid,
            topic_kind,
            extra_data,
            status: EventStatus::Queued,
            execute_at,
            retry_count: 0,
            internal_error_count: 0,
            lock_id: None,
            locked_at: None,
            error_response: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a dispatcher may claim the event at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, lease_timeout: Duration) -> bool {
        match self.status {
            EventStatus::Queued => self.execute_at <= now,
            EventStatus::InFlight => self
                .locked_at
                .is_none_or(|locked_at| locked_at + lease_timeout <= now),
            EventStatus::Delivered | EventStatus::Failed => false,
        }
    }

    /// Take the claim.
    ///
    /// Taking over an expired claim counts as an internal error: the previous
    /// holder died mid-delivery.
    pub fn claim(&mut self, lock_id: impl Into<String>, now: DateTime<Utc>) {
        if self.status == EventStatus::InFlight {
            self.internal_error_count += 1;
        }
        self.status = EventStatus::InFlight;
        self.lock_id = Some(lock_id.into());
        self.locked_at = Some(now);
        self.updated_at = now;
    }

    /// Apply a completion and release the claim.
    pub fn apply(&mut self, update: &EventUpdate, now: DateTime<Utc>) {
        match update {
            EventUpdate::Delivered => {
                self.status = EventStatus::Delivered;
                self.error_response = None;
            }
            EventUpdate::Retry {
                retry_count,
                internal_error_count,
                execute_at,
                error_response,
            } => {
                self.status = EventStatus::Queued;
                self.retry_count = *retry_count;
                self.internal_error_count = *internal_error_count;
                self.execute_at = *execute_at;
                self.error_response = Some(error_response.clone());
            }
            EventUpdate::Failed {
                retry_count,
                internal_error_count,
                error_response,
            } => {
                self.status = EventStatus::Failed;
                self.retry_count = *retry_count;
                self.internal_error_count = *internal_error_count;
                self.error_response = Some(error_response.clone());
            }
        }
        self.lock_id = None;
        self.locked_at = None;
        self.updated_at = now;
    }
}

/// Outcome written back by the dispatcher when it releases a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventUpdate {
    /// Receiver acknowledged
    Delivered,

    /// Re-queue for a later attempt
    Retry {
        retry_count: u32,
        internal_error_count: u32,
        execute_at: DateTime<Utc>,
        error_response: String,
    },

    /// Give up
    Failed {
        retry_count: u32,
        internal_error_count: u32,
        error_response: String,
    },
}

impl EventUpdate {
    /// Status the event ends up in.
    pub fn status(&self) -> EventStatus {
        match self {
            Self::Delivered => EventStatus::Delivered,
            Self::Retry { .. } => EventStatus::Queued,
            Self::Failed { .. } => EventStatus::Failed,
        }
    }
}

/// Failure details stored in `error_response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status of the receiver, if it answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Response body (truncated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Error description
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status_code: None,
            body: None,
            error: error.into(),
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_body(mut self, body: impl AsRef<str>) -> Self {
        self.body = Some(truncate_string(body.as_ref(), MAX_STORED_BODY_LEN));
        self
    }

    /// Encode for storage.
    pub fn to_json(&self) -> String {
        // A struct of strings and integers always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"error\":{:?}}}", self.error))
    }
}

/// Truncate a string to at most `max_len` bytes on a char boundary.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(execute_at: DateTime<Utc>) -> Event {
        Event::queued(
            1,
            Uuid::new_v4(),
            TopicKind::TagVideo,
            serde_json::json!({"video_id": 1}),
            execute_at,
        )
    }

    #[test]
    fn test_status_transitions() {
        use EventStatus::*;

        assert!(Queued.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Delivered));
        assert!(InFlight.can_transition_to(Queued));
        assert!(InFlight.can_transition_to(InFlight));
        assert!(!Queued.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Queued));
        assert!(!Failed.can_transition_to(InFlight));
        assert!(Delivered.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!InFlight.is_terminal());
    }

    #[test]
    fn test_new_event_is_queued() {
        let event = event(Utc::now());
        assert_eq!(event.status, EventStatus::Queued);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.internal_error_count, 0);
        assert!(event.lock_id.is_none());
        assert!(event.error_response.is_none());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let lease = Duration::seconds(60);

        assert!(event(now).is_due(now, lease));
        assert!(!event(now + Duration::seconds(1)).is_due(now, lease));

        let mut claimed = event(now);
        claimed.claim("worker:1", now);
        assert!(!claimed.is_due(now + Duration::seconds(30), lease));
        assert!(claimed.is_due(now + Duration::seconds(60), lease));
    }

    #[test]
    fn test_reclaim_counts_internal_error() {
        let now = Utc::now();
        let mut event = event(now);

        event.claim("worker:1", now);
        assert_eq!(event.internal_error_count, 0);

        event.claim("worker:2", now + Duration::seconds(61));
        event.claim("worker:3", now + Duration::seconds(122));
        assert_eq!(event.internal_error_count, 2);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.lock_id.as_deref(), Some("worker:3"));
    }

    #[test]
    fn test_apply_releases_claim() {
        let now = Utc::now();
        let mut event = event(now);
        event.claim("worker:1", now);

        let update = EventUpdate::Retry {
            retry_count: 1,
            internal_error_count: 0,
            execute_at: now + Duration::seconds(5),
            error_response: ErrorResponse::new("timeout").to_json(),
        };
        event.apply(&update, now);

        assert_eq!(event.status, EventStatus::Queued);
        assert_eq!(event.retry_count, 1);
        assert!(event.lock_id.is_none());
        assert!(event.locked_at.is_none());
        assert!(!event.status.is_terminal());
    }

    #[test]
    fn test_error_response_json() {
        let json = ErrorResponse::new("HTTP 503")
            .with_status(503)
            .with_body("unavailable")
            .to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["status_code"], 503);
        assert_eq!(value["body"], "unavailable");
        assert_eq!(value["error"], "HTTP 503");

        let bare: serde_json::Value =
            serde_json::from_str(&ErrorResponse::new("endpoint_unavailable").to_json()).unwrap();
        assert!(bare.get("status_code").is_none());
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("abcdefghijkl", 8), "abcde...");
        let truncated = truncate_string(&"é".repeat(10), 8);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 8);
    }
}
