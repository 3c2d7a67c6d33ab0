//! Event fan-out
//!
//! Translates one content change into one queued event per subscribed
//! endpoint. Subscribers are read in pages of distinct
//! `(client_id, endpoint_uuid)` pairs using a keyset cursor, and each page is
//! written with a single bulk insert.

use crate::alert::{Alert, AlertKind, AlertSeverity, AlertSink};
use crate::{
    ContentChange, EndpointRef, Event, Result, TopicKind, WebhookConfig, WebhookStore,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Summary of one fan-out run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Page queries issued
    pub pages: usize,

    /// Events inserted
    pub events_created: usize,
}

/// Creates delivery events for content changes.
#[derive(Clone)]
pub struct FanoutGenerator {
    store: Arc<dyn WebhookStore>,
    alerts: Arc<dyn AlertSink>,
    page_size: usize,
}

impl FanoutGenerator {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        alerts: Arc<dyn AlertSink>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            store,
            alerts,
            page_size: config.page_size.max(1),
        }
    }

    /// Queue one event per endpoint subscribed to `topic_kind` for any of
    /// `entity_ids`.
    ///
    /// An endpoint subscribed to several of the ids still receives a single
    /// event.
    pub async fn fanout(
        &self,
        topic_kind: TopicKind,
        change: &ContentChange,
        entity_ids: &[i64],
    ) -> Result<FanoutReport> {
        let mut ids = entity_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut report = FanoutReport::default();
        if ids.is_empty() {
            return Ok(report);
        }

        let handler = topic_kind.handler();
        let now = Utc::now();
        let payload = handler.build_payload(change);
        let execute_at = handler.compute_execute_at(change, now);

        let mut after: Option<EndpointRef> = None;
        loop {
            let page = self
                .store
                .subscribed_endpoints_page(topic_kind, &ids, after.as_ref(), self.page_size)
                .await?;
            report.pages += 1;

            if !page.is_empty() {
                let events: Vec<Event> = page
                    .iter()
                    .map(|r| {
                        Event::queued(
                            r.client_id,
                            r.endpoint_uuid,
                            handler.topic_kind(),
                            payload.clone(),
                            execute_at,
                        )
                    })
                    .collect();
                let count = events.len();

                if let Err(e) = self.store.insert_events(events).await {
                    error!(
                        target: "webhook_fanout",
                        topic_kind = %topic_kind,
                        entity_id = change.entity_id,
                        page = report.pages,
                        error = %e,
                        "failed to insert webhook events"
                    );
                    self.alerts
                        .alert(
                            Alert::new(
                                AlertSeverity::Critical,
                                AlertKind::FanoutInsertFailed,
                                "failed to insert webhook events",
                            )
                            .with("topic_kind", topic_kind)
                            .with("entity_id", change.entity_id)
                            .with("page", report.pages)
                            .with("events", count)
                            .with("error", &e),
                        )
                        .await;
                    return Err(e);
                }

                report.events_created += count;
                debug!(target: "webhook_fanout", topic_kind = %topic_kind, page = report.pages, events = count, "queued page");
            }

            if page.len() < self.page_size {
                break;
            }
            after = page.last().copied();
        }

        info!(
            target: "webhook_fanout",
            topic_kind = %topic_kind,
            entity_id = change.entity_id,
            pages = report.pages,
            events_created = report.events_created,
            "fan-out complete"
        );
        Ok(report)
    }
}
