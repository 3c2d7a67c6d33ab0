//! Operational alerts raised by fan-out and the dispatcher

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, warn};

/// How urgently an alert needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Events for a content change could not be written
    FanoutInsertFailed,
    /// An event was given up
    DeliveryFailed,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FanoutInsertFailed => "fanout_insert_failed",
            Self::DeliveryFailed => "delivery_failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(severity: AlertSeverity, kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach a context value.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }
}

/// Destination for operational alerts (pager, chat, log).
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, alert: Alert);
}

/// Sink that writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn alert(&self, alert: Alert) {
        let context = serde_json::to_string(&alert.context).unwrap_or_default();
        match alert.severity {
            AlertSeverity::Critical => error!(
                target: "pepo_webhooks::alert",
                kind = %alert.kind,
                context = %context,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                target: "pepo_webhooks::alert",
                kind = %alert.kind,
                context = %context,
                "{}",
                alert.message
            ),
        }
    }
}
