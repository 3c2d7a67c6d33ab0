// Pepo - Webhook platform for the Pepo content API
//
// This library wires the webhook subsystem together: API clients register
// endpoints, subscribe them to content topics, and receive signed callbacks
// when matching content changes.

// Re-export the member crates
pub use pepo_cache;
pub use pepo_log;
pub use pepo_webhooks;

pub use pepo_webhooks::{Result, WebhookError, WebhookServices};

/// Install the global tracing subscriber configured from `PEPO_LOG_*`.
///
/// Safe to call more than once.
pub fn init_logging() {
    pepo_log::init();
}

// Prelude for common imports
pub mod prelude {
    pub use pepo_cache::{CacheStore, InMemoryCache};
    pub use pepo_webhooks::{
        Alert,
        AlertSink,
        ChangeAction,
        ClientStatus,
        ContentChange,
        DispatchReport,
        Dispatcher,
        DispatcherHandle,
        EndpointRegistry,
        EndpointStatus,
        EndpointView,
        Event,
        EventStatus,
        FanoutGenerator,
        FanoutReport,
        InMemoryStore,
        KeyManagementService,
        LocalKms,
        RetryPolicy,
        SubscriptionReconciler,
        TopicKind,
        TopicRequest,
        WebhookConfig,
        WebhookError,
        WebhookServices,
        WebhookSignature,
        WebhookStore,
    };

    #[cfg(feature = "redis")]
    pub use pepo_cache::{CacheConfig, RedisCache};
}
