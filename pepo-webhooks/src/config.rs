//! Configuration for the webhook components

use crate::{Result, RetryPolicy, WebhookError};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Configuration shared by the registry, fan-out, client and dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    /// Hard timeout for a delivery request
    pub timeout: Duration,

    /// User-Agent header for outgoing requests
    pub user_agent: String,

    /// API version sent in `pepo-version` and signed
    pub api_version: String,

    /// Maximum serialized payload size in bytes
    pub max_payload_size: usize,

    /// Timestamp tolerance for signature verification (in seconds)
    pub timestamp_tolerance: u64,

    /// Whether plain `http://` endpoint URLs are accepted
    pub allow_http: bool,

    /// Distinct endpoints per fan-out page
    pub page_size: usize,

    /// Events claimed per dispatcher tick
    pub batch_size: usize,

    /// Deliveries in flight per dispatcher
    pub concurrency: usize,

    /// Pause between dispatcher ticks
    pub poll_interval: Duration,

    /// Age after which an in-flight claim may be taken over
    pub lease_timeout: Duration,

    /// Backoff and retry limit for failed deliveries
    pub retry_policy: RetryPolicy,

    /// Local failures, reclaims of an expired lease included, after which an
    /// event is given up
    pub max_internal_errors: u32,

    /// How long a replaced secret keeps signing after rotation
    pub rotation_window: Duration,

    /// TTL of the endpoint read-through cache
    pub cache_ttl: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: format!("Pepo-Webhooks/{}", env!("CARGO_PKG_VERSION")),
            api_version: "v2".to_string(),
            max_payload_size: 1024 * 1024, // 1MB
            timestamp_tolerance: 300,      // 5 minutes
            allow_http: false,
            page_size: 100,
            batch_size: 100,
            concurrency: 10,
            poll_interval: Duration::from_secs(1),
            lease_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
            max_internal_errors: 5,
            rotation_window: Duration::from_secs(24 * 60 * 60),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl WebhookConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom configuration
    pub fn builder() -> WebhookConfigBuilder {
        WebhookConfigBuilder::new()
    }

    /// Load from `PEPO_WEBHOOK_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_loader(&EnvLoader::new("PEPO_WEBHOOK"))
    }

    /// Load from an [`EnvLoader`] on top of the defaults.
    pub fn from_loader(loader: &EnvLoader) -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = loader.parse::<u64>("TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(user_agent) = loader.load_var("USER_AGENT") {
            config.user_agent = user_agent;
        }
        if let Some(api_version) = loader.load_var("API_VERSION") {
            config.api_version = api_version;
        }
        if let Some(page_size) = loader.parse("PAGE_SIZE")? {
            config.page_size = page_size;
        }
        if let Some(batch_size) = loader.parse("BATCH_SIZE")? {
            config.batch_size = batch_size;
        }
        if let Some(concurrency) = loader.parse("CONCURRENCY")? {
            config.concurrency = concurrency;
        }
        if let Some(ms) = loader.parse::<u64>("POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = loader.parse::<u64>("LEASE_TIMEOUT_SECS")? {
            config.lease_timeout = Duration::from_secs(secs);
        }
        if let Some(max_retries) = loader.parse("MAX_RETRIES")? {
            config.retry_policy.max_retries = max_retries;
        }
        if let Some(max) = loader.parse("MAX_INTERNAL_ERRORS")? {
            config.max_internal_errors = max;
        }
        if let Some(secs) = loader.parse::<u64>("ROTATION_WINDOW_SECS")? {
            config.rotation_window = Duration::from_secs(secs);
        }
        if let Some(secs) = loader.parse::<u64>("CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(allow_http) = loader.parse_flag("ALLOW_HTTP")? {
            config.allow_http = allow_http;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("page_size", self.page_size),
            ("batch_size", self.batch_size),
            ("concurrency", self.concurrency),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(WebhookError::ConfigError(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.timeout.is_zero() {
            return Err(WebhookError::ConfigError(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.lease_timeout <= self.timeout {
            return Err(WebhookError::ConfigError(
                "lease_timeout must exceed the request timeout".to_string(),
            ));
        }
        if self.retry_policy.max_retries == 0 {
            return Err(WebhookError::ConfigError(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.api_version.trim().is_empty() {
            return Err(WebhookError::ConfigError(
                "api_version must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for WebhookConfig
#[derive(Debug, Clone, Default)]
pub struct WebhookConfigBuilder {
    config: WebhookConfig,
}

impl WebhookConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: WebhookConfig::default(),
        }
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout = Duration::from_secs(secs);
        self
    }

    /// Set the User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the signed API version
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.config.api_version = api_version.into();
        self
    }

    /// Set maximum payload size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set timestamp tolerance for signature verification
    pub fn timestamp_tolerance(mut self, seconds: u64) -> Self {
        self.config.timestamp_tolerance = seconds;
        self
    }

    /// Accept plain `http://` endpoint URLs
    pub fn allow_http(mut self, allow: bool) -> Self {
        self.config.allow_http = allow;
        self
    }

    /// Set the fan-out page size
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Set the dispatcher batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the dispatcher concurrency
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the dispatcher poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the claim lease timeout
    pub fn lease_timeout(mut self, lease: Duration) -> Self {
        self.config.lease_timeout = lease;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Set the maximum number of failed deliveries
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.retry_policy.max_retries = max_retries;
        self
    }

    /// Set the maximum number of local failures
    pub fn max_internal_errors(mut self, max: u32) -> Self {
        self.config.max_internal_errors = max;
        self
    }

    /// Set the secret rotation window
    pub fn rotation_window(mut self, window: Duration) -> Self {
        self.config.rotation_window = window;
        self
    }

    /// Set the endpoint cache TTL
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Build the configuration
    pub fn build(self) -> WebhookConfig {
        self.config
    }
}

/// Environment variable loader with an optional prefix.
///
/// `EnvLoader::new("PEPO_WEBHOOK").load_var("PAGE_SIZE")` reads
/// `PEPO_WEBHOOK_PAGE_SIZE`.
pub struct EnvLoader {
    prefix: Option<String>,
    vars: Option<HashMap<String, String>>,
}

impl EnvLoader {
    /// Read from the process environment.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            vars: None,
        }
    }

    /// Read from a fixed set of variables instead of the process environment.
    pub fn from_vars<I, K, V>(prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: Some(prefix.into()),
            vars: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    fn full_key(&self, key: &str) -> String {
        match self.prefix {
            Some(ref prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }

    /// Load a specific variable; empty values count as unset.
    pub fn load_var(&self, key: &str) -> Option<String> {
        let full_key = self.full_key(key);
        let value = match self.vars {
            Some(ref vars) => vars.get(&full_key).cloned(),
            None => std::env::var(&full_key).ok(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|| default.to_string())
    }

    /// Load and parse a variable.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.load_var(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    WebhookError::ConfigError(format!("{}: {e}", self.full_key(key)))
                })
            })
            .transpose()
    }

    /// Load a boolean flag (`1`/`0`/`true`/`false`/`yes`/`no`).
    pub fn parse_flag(&self, key: &str) -> Result<Option<bool>> {
        self.load_var(key)
            .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(WebhookError::ConfigError(format!(
                    "{}: invalid flag {other:?}",
                    self.full_key(key)
                ))),
            })
            .transpose()
    }
}
