//! Delivery dispatcher
//!
//! Polls the store for due events, claims them, and delivers them through the
//! signed client. Several dispatchers may run against the same store: a claim
//! is a conditional update, and every completion is conditional on still
//! holding the claim's `lock_id`. A claim that is never completed (crashed
//! worker) expires after `lease_timeout` and the event becomes due again.

use crate::alert::{Alert, AlertKind, AlertSeverity, AlertSink};
use crate::{
    DeliveryOutcome, EndpointRegistry, ErrorResponse, Event, EventUpdate, Result, WebhookClient,
    WebhookConfig, WebhookError, WebhookStore,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error recorded when the endpoint of an event can no longer receive.
pub const ENDPOINT_UNAVAILABLE: &str = "endpoint_unavailable";

/// Error recorded when an event was reclaimed from dead workers too often.
pub const LEASE_EXPIRED: &str = "lease_expired";

/// Counts for one dispatcher tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events claimed by this tick
    pub claimed: usize,
    /// Events acknowledged by their receiver
    pub delivered: usize,
    /// Events re-queued for a later attempt
    pub retried: usize,
    /// Events given up
    pub failed: usize,
    /// Due events lost to another worker, or whose completion was dropped
    pub skipped: usize,
}

impl DispatchReport {
    fn record(&mut self, processed: Processed) {
        match processed {
            Processed::Delivered => self.delivered += 1,
            Processed::Retried => self.retried += 1,
            Processed::Failed => self.failed += 1,
            Processed::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    Delivered,
    Retried,
    Failed,
    Skipped,
}

/// Claims due events and delivers them.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn WebhookStore>,
    registry: EndpointRegistry,
    client: WebhookClient,
    alerts: Arc<dyn AlertSink>,
    config: WebhookConfig,
    worker_id: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        registry: EndpointRegistry,
        client: WebhookClient,
        alerts: Arc<dyn AlertSink>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            alerts,
            config,
            worker_id: format!("dispatcher-{}", Uuid::new_v4().simple()),
        }
    }

    /// Use a fixed worker token as the prefix of every lock id.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim and deliver one batch of events due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let lease = chrono::Duration::from_std(self.config.lease_timeout)
            .map_err(|e| WebhookError::ConfigError(format!("lease timeout: {e}")))?;
        let due = self
            .store
            .due_events(now, lease, self.config.batch_size)
            .await?;

        // An event is claimed only once a slot is free for it; the lease
        // starts at the claim, not at the scan.
        let started = tokio::time::Instant::now();
        let results: Vec<(bool, Processed)> = futures::stream::iter(due)
            .map(|event| {
                let claim_at = now
                    + chrono::Duration::from_std(started.elapsed())
                        .unwrap_or_else(|_| chrono::Duration::zero());
                self.claim_and_process(event, claim_at, lease)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = DispatchReport::default();
        for (claimed, processed) in results {
            if claimed {
                report.claimed += 1;
            }
            report.record(processed);
        }

        if report.claimed > 0 || report.skipped > 0 {
            info!(
                target: "webhook_dispatch",
                claimed = report.claimed,
                delivered = report.delivered,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                "dispatch tick"
            );
        }
        Ok(report)
    }

    /// Tick every `poll_interval` until `shutdown` turns true or its sender is
    /// dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(target: "webhook_dispatch", worker_id = %self.worker_id, concurrency = self.config.concurrency, "dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.tick(Utc::now()).await {
                error!(target: "webhook_dispatch", error = %e, "dispatch tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(target: "webhook_dispatch", worker_id = %self.worker_id, "dispatcher stopped");
    }

    /// Spawn [`Dispatcher::run`] on the runtime.
    pub fn start(&self) -> DispatcherHandle {
        let (tx, rx) = watch::channel(false);
        let dispatcher = self.clone();
        let handle = tokio::spawn(async move { dispatcher.run(rx).await });
        DispatcherHandle {
            shutdown: tx,
            handle,
        }
    }

    /// Claim one due event and deliver it. Returns whether the claim was won.
    async fn claim_and_process(
        &self,
        event: Event,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> (bool, Processed) {
        let lock_id = format!("{}:{}", self.worker_id, Uuid::new_v4());
        let event = match self.store.claim_event(event.uuid, &lock_id, now, lease).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(target: "webhook_dispatch", event_uuid = %event.uuid, "event claimed elsewhere");
                return (false, Processed::Skipped);
            }
            Err(e) => {
                error!(target: "webhook_dispatch", event_uuid = %event.uuid, error = %e, "failed to claim event");
                return (false, Processed::Skipped);
            }
        };
        (true, self.process(event, lock_id, now).await)
    }

    async fn process(&self, event: Event, lock_id: String, now: DateTime<Utc>) -> Processed {
        let event_uuid = event.uuid;
        match self.deliver(&event, &lock_id, now).await {
            Ok(processed) => processed,
            Err(e) => {
                // The claim stays in place and expires with the lease.
                error!(target: "webhook_dispatch", event_uuid = %event_uuid, error = %e, "failed to record delivery result");
                Processed::Skipped
            }
        }
    }

    async fn deliver(&self, event: &Event, lock_id: &str, now: DateTime<Utc>) -> Result<Processed> {
        // Every holder before this one died mid-delivery.
        if event.internal_error_count >= self.config.max_internal_errors {
            warn!(
                target: "webhook_dispatch",
                event_uuid = %event.uuid,
                internal_error_count = event.internal_error_count,
                "lease expired too often, giving up"
            );
            let update = EventUpdate::Failed {
                retry_count: event.retry_count,
                internal_error_count: event.internal_error_count,
                error_response: ErrorResponse::new(LEASE_EXPIRED).to_json(),
            };
            return self.complete(event, lock_id, update, now).await;
        }

        let endpoint = match self.registry.find_endpoint(event.endpoint_uuid).await {
            Ok(Some(endpoint)) if endpoint.status.is_active() => endpoint,
            Ok(_) => {
                let update = EventUpdate::Failed {
                    retry_count: event.retry_count,
                    internal_error_count: event.internal_error_count,
                    error_response: ErrorResponse::new(ENDPOINT_UNAVAILABLE).to_json(),
                };
                return self.complete(event, lock_id, update, now).await;
            }
            Err(e) => return self.internal_error(event, lock_id, e, now).await,
        };

        let secrets = match self.registry.active_secrets(&endpoint, now).await {
            Ok(secrets) => secrets,
            Err(e) => return self.internal_error(event, lock_id, e, now).await,
        };

        let outcome = match self
            .client
            .post(&endpoint.url, &secrets, &self.config.api_version, &event.extra_data)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.internal_error(event, lock_id, e, now).await,
        };

        let update = match outcome {
            DeliveryOutcome::Delivered { .. } => EventUpdate::Delivered,
            ref failed @ DeliveryOutcome::Failed { .. } => {
                let retry_count = event.retry_count + 1;
                let error_response = failed
                    .error_response()
                    .unwrap_or_else(|| ErrorResponse::new("delivery failed"))
                    .to_json();
                let policy = &self.config.retry_policy;

                if policy.should_retry(retry_count) {
                    EventUpdate::Retry {
                        retry_count,
                        internal_error_count: event.internal_error_count,
                        execute_at: policy.next_execute_at(now, retry_count),
                        error_response,
                    }
                } else {
                    EventUpdate::Failed {
                        retry_count,
                        internal_error_count: event.internal_error_count,
                        error_response,
                    }
                }
            }
        };

        self.complete(event, lock_id, update, now).await
    }

    async fn internal_error(
        &self,
        event: &Event,
        lock_id: &str,
        err: WebhookError,
        now: DateTime<Utc>,
    ) -> Result<Processed> {
        let internal_error_count = event.internal_error_count + 1;
        let error_response = ErrorResponse::new(format!("{}: {err}", err.code())).to_json();
        warn!(
            target: "webhook_dispatch",
            event_uuid = %event.uuid,
            internal_error_count,
            error = %err,
            "internal error preparing delivery"
        );

        let update = if err.is_retryable() && internal_error_count < self.config.max_internal_errors
        {
            EventUpdate::Retry {
                retry_count: event.retry_count,
                internal_error_count,
                execute_at: self
                    .config
                    .retry_policy
                    .next_execute_at(now, internal_error_count),
                error_response,
            }
        } else {
            EventUpdate::Failed {
                retry_count: event.retry_count,
                internal_error_count,
                error_response,
            }
        };

        self.complete(event, lock_id, update, now).await
    }

    async fn complete(
        &self,
        event: &Event,
        lock_id: &str,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<Processed> {
        let processed = match update {
            EventUpdate::Delivered => Processed::Delivered,
            EventUpdate::Retry { .. } => Processed::Retried,
            EventUpdate::Failed { .. } => Processed::Failed,
        };
        let terminal_error = match update {
            EventUpdate::Failed {
                ref error_response,
                retry_count,
                internal_error_count,
            } => Some((error_response.clone(), retry_count, internal_error_count)),
            _ => None,
        };

        let written = self
            .store
            .complete_event(event.uuid, lock_id, update, now)
            .await?;
        if !written {
            warn!(target: "webhook_dispatch", event_uuid = %event.uuid, lock_id = %lock_id, "lease lost, dropping result");
            return Ok(Processed::Skipped);
        }

        if let Some((error_response, retry_count, internal_error_count)) = terminal_error {
            self.alerts
                .alert(
                    Alert::new(
                        AlertSeverity::Critical,
                        AlertKind::DeliveryFailed,
                        "webhook event permanently failed",
                    )
                    .with("event_uuid", event.uuid)
                    .with("endpoint_uuid", event.endpoint_uuid)
                    .with("client_id", event.client_id)
                    .with("retry_count", retry_count)
                    .with("internal_error_count", internal_error_count)
                    .with("error_response", error_response),
                )
                .await;
        }

        Ok(processed)
    }
}

/// Handle to a dispatcher spawned with [`Dispatcher::start`].
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Ask the loop to stop and wait for the current tick to finish.
    pub async fn stop(self) -> Result<()> {
        // The receiver is gone only if the task already ended.
        let _ = self.shutdown.send(true);
        self.handle
            .await
            .map_err(|e| WebhookError::Internal(format!("dispatcher task failed: {e}")))
    }

    /// Whether the loop has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
