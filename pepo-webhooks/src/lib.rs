//! Webhook subscriptions and delivery for Pepo
//!
//! API clients register callback endpoints, declare which content topics each
//! endpoint wants, and receive signed HTTP callbacks when matching content
//! changes.
//!
//! # Components
//!
//! - **Secret vault**: endpoint secrets are sealed with envelope encryption
//!   ([`SecretVault`], [`KeyManagementService`])
//! - **Endpoint registry**: registration, revival of deleted endpoints, status
//!   changes, secret rotation ([`EndpointRegistry`])
//! - **Subscription reconciler**: converges an endpoint's topics to a declared
//!   set ([`SubscriptionReconciler`])
//! - **Fan-out**: one queued [`Event`] per subscribed endpoint for a content
//!   change ([`FanoutGenerator`])
//! - **Dispatcher**: claims due events and delivers them with retry
//!   ([`Dispatcher`])
//! - **Signed client**: HMAC-SHA256 signed POSTs ([`WebhookClient`],
//!   [`WebhookSignature`])
//!
//! Persistence goes through [`WebhookStore`]; [`InMemoryStore`] implements it
//! for tests and local development.
//!
//! # Example
//!
//! ```rust,no_run
//! use pepo_cache::InMemoryCache;
//! use pepo_webhooks::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let store = InMemoryStore::new();
//! store.upsert_client(42, ClientStatus::Active).await;
//!
//! let services = WebhookServices::new(
//!     WebhookConfig::from_env()?,
//!     Arc::new(store),
//!     Arc::new(InMemoryCache::new()),
//!     Arc::new(LocalKms::from_env()?),
//! )?;
//!
//! let endpoint = services
//!     .registry
//!     .add_endpoint(42, "https://example.com/pepo-hooks", None)
//!     .await?;
//! services
//!     .reconciler
//!     .sync_subscriptions(42, endpoint.id, &[TopicRequest::new("tag_video", 7)])
//!     .await?;
//!
//! let change = ContentChange::new(1001, ChangeAction::Created, serde_json::json!({"title": "hi"}));
//! services.fanout.fanout(TopicKind::TagVideo, &change, &[7]).await?;
//!
//! let handle = services.dispatcher.start();
//! // ...
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod alert;
mod client;
mod config;
mod dispatcher;
mod endpoint;
mod error;
mod event;
mod fanout;
mod memory;
mod reconciler;
mod registry;
mod retry;
mod services;
pub mod signature;
mod store;
mod subscription;
mod topic;
pub mod vault;

pub use alert::{Alert, AlertKind, AlertSeverity, AlertSink, TracingAlertSink};
pub use client::{DeliveryOutcome, WebhookClient};
pub use config::{EnvLoader, WebhookConfig, WebhookConfigBuilder};
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherHandle, ENDPOINT_UNAVAILABLE, LEASE_EXPIRED};
pub use endpoint::{Endpoint, EndpointStatus, EndpointView};
pub use error::WebhookError;
pub use event::{ErrorResponse, Event, EventStatus, EventUpdate, truncate_string};
pub use fanout::{FanoutGenerator, FanoutReport};
pub use memory::InMemoryStore;
pub use reconciler::{ReconcilePlan, SubscriptionReconciler, plan_reconciliation};
pub use registry::{EndpointRegistry, endpoint_cache_key};
pub use retry::RetryPolicy;
pub use services::WebhookServices;
pub use signature::{SIGNATURE_KIND, WebhookSignature};
pub use store::{ApiClient, ClientStatus, EndpointRef, WebhookStore};
pub use subscription::{NewSubscription, Subscription, SubscriptionStatus, TopicKey, TopicRequest};
pub use topic::{ChangeAction, ContentChange, TopicHandler, TopicKind, VideoTopicHandler};
pub use vault::{DataKey, KeyManagementService, LocalCipher, LocalKms, SealedSecret, SecretVault};

/// Result type for webhook operations
pub type Result<T> = std::result::Result<T, WebhookError>;
