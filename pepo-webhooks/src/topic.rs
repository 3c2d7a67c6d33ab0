//! Topic kinds and the per-topic delivery strategies.
//!
//! A topic kind names a category of content change an endpoint can subscribe
//! to, scoped by a content entity id (for `tag_video`, the tag id). Each kind
//! maps to exactly one [`TopicHandler`] through [`TopicKind::handler`], which
//! decides the payload shape and when the resulting events become due.

use crate::{Result, WebhookError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of content change an endpoint may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    /// Videos carrying a given tag; entity id is the tag id
    TagVideo,
    /// Videos posted by a given user; entity id is the user id
    UserVideo,
    /// Videos shared into a given channel; entity id is the channel id
    ChannelVideo,
}

impl TopicKind {
    /// Every known topic kind.
    pub const ALL: [TopicKind; 3] = [Self::TagVideo, Self::UserVideo, Self::ChannelVideo];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TagVideo => "tag_video",
            Self::UserVideo => "user_video",
            Self::ChannelVideo => "channel_video",
        }
    }

    /// Parse a client-supplied kind, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| WebhookError::UnknownTopicKind(raw.trim().to_string()))
    }

    /// Strategy used to fan out changes for this kind.
    pub fn handler(&self) -> &'static dyn TopicHandler {
        match self {
            Self::TagVideo => &TAG_VIDEO,
            Self::UserVideo => &USER_VIDEO,
            Self::ChannelVideo => &CHANNEL_VIDEO,
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicKind {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// What happened to the content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// A domain mutation that triggers fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChange {
    /// Id of the changed entity (e.g. the video id)
    pub entity_id: i64,

    /// Kind of change
    pub action: ChangeAction,

    /// Snapshot of the entity as seen by receivers
    pub data: serde_json::Value,

    /// When the change happened
    pub occurred_at: DateTime<Utc>,
}

impl ContentChange {
    /// Create a change stamped with the current time.
    pub fn new(entity_id: i64, action: ChangeAction, data: serde_json::Value) -> Self {
        Self {
            entity_id,
            action,
            data,
            occurred_at: Utc::now(),
        }
    }
}

/// Per-topic strategy composed into the generic fan-out.
pub trait TopicHandler: Send + Sync {
    /// Topic kind written to every event this handler produces.
    fn topic_kind(&self) -> TopicKind;

    /// Body delivered to receivers (stored as the event's `extra_data`).
    fn build_payload(&self, change: &ContentChange) -> serde_json::Value;

    /// When the event becomes due for delivery.
    fn compute_execute_at(&self, change: &ContentChange, now: DateTime<Utc>) -> DateTime<Utc>;
}

/// Handler shared by the video topics; they differ only in kind and settle delay.
#[derive(Debug)]
pub struct VideoTopicHandler {
    kind: TopicKind,
    created_delay_secs: i64,
}

impl VideoTopicHandler {
    /// Create a handler for a video topic.
    pub const fn new(kind: TopicKind, created_delay_secs: i64) -> Self {
        Self {
            kind,
            created_delay_secs,
        }
    }
}

// New videos are held back until media processing has produced the renditions.
static TAG_VIDEO: VideoTopicHandler = VideoTopicHandler::new(TopicKind::TagVideo, 30);
static USER_VIDEO: VideoTopicHandler = VideoTopicHandler::new(TopicKind::UserVideo, 30);
static CHANNEL_VIDEO: VideoTopicHandler = VideoTopicHandler::new(TopicKind::ChannelVideo, 30);

impl TopicHandler for VideoTopicHandler {
    fn topic_kind(&self) -> TopicKind {
        self.kind
    }

    fn build_payload(&self, change: &ContentChange) -> serde_json::Value {
        serde_json::json!({
            "topic": self.kind.as_str(),
            "event": format!("video.{}", change.action.as_str()),
            "created_at": change.occurred_at.timestamp(),
            "data": {
                "video_id": change.entity_id,
                "video": change.data,
            },
        })
    }

    fn compute_execute_at(&self, change: &ContentChange, now: DateTime<Utc>) -> DateTime<Utc> {
        match change.action {
            ChangeAction::Created => now + Duration::seconds(self.created_delay_secs),
            ChangeAction::Updated | ChangeAction::Deleted => now,
        }
    }
}
