//! Wiring of the webhook components over shared collaborators.

use crate::alert::{AlertSink, TracingAlertSink};
use crate::vault::{KeyManagementService, SecretVault};
use crate::{
    Dispatcher, EndpointRegistry, FanoutGenerator, Result, SubscriptionReconciler, WebhookClient,
    WebhookConfig, WebhookStore,
};
use pepo_cache::CacheStore;
use std::sync::Arc;

/// Every webhook component, built once over the same store, cache and vault.
#[derive(Clone)]
pub struct WebhookServices {
    pub registry: EndpointRegistry,
    pub reconciler: SubscriptionReconciler,
    pub fanout: FanoutGenerator,
    pub dispatcher: Dispatcher,
    pub config: WebhookConfig,
}

impl WebhookServices {
    /// Build with alerts going to the log.
    pub fn new(
        config: WebhookConfig,
        store: Arc<dyn WebhookStore>,
        cache: Arc<dyn CacheStore>,
        kms: Arc<dyn KeyManagementService>,
    ) -> Result<Self> {
        Self::with_alerts(config, store, cache, kms, Arc::new(TracingAlertSink))
    }

    /// Build with a custom alert sink.
    pub fn with_alerts(
        config: WebhookConfig,
        store: Arc<dyn WebhookStore>,
        cache: Arc<dyn CacheStore>,
        kms: Arc<dyn KeyManagementService>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;

        let vault = SecretVault::new(kms);
        let registry = EndpointRegistry::new(store.clone(), cache, vault, config.clone());
        let reconciler = SubscriptionReconciler::new(store.clone(), registry.clone());
        let fanout = FanoutGenerator::new(store.clone(), alerts.clone(), &config);
        let client = WebhookClient::new(&config)?;
        let dispatcher = Dispatcher::new(store, registry.clone(), client, alerts, config.clone());

        Ok(Self {
            registry,
            reconciler,
            fanout,
            dispatcher,
            config,
        })
    }
}
