//! Webhook endpoint registry
//!
//! Owns the endpoint lifecycle: registration (with revival of soft-deleted
//! rows), status changes, soft deletion and secret rotation. Reads go through
//! a read-through cache keyed by endpoint uuid; every write invalidates it.

use crate::vault::SecretVault;
use crate::{
    ApiClient, Endpoint, EndpointStatus, EndpointView, Result, SubscriptionStatus, WebhookConfig,
    WebhookError, WebhookStore,
};
use chrono::{DateTime, Utc};
use pepo_cache::CacheStore;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Cache key of an endpoint row.
pub fn endpoint_cache_key(uuid: Uuid) -> String {
    format!("webhook_endpoint:{uuid}")
}

/// Registry for managing webhook endpoints
#[derive(Clone)]
pub struct EndpointRegistry {
    store: Arc<dyn WebhookStore>,
    cache: Arc<dyn CacheStore>,
    vault: SecretVault,
    config: WebhookConfig,
}

impl EndpointRegistry {
    /// Create a registry over the given collaborators.
    pub fn new(
        store: Arc<dyn WebhookStore>,
        cache: Arc<dyn CacheStore>,
        vault: SecretVault,
        config: WebhookConfig,
    ) -> Self {
        Self {
            store,
            cache,
            vault,
            config,
        }
    }

    /// Register `url` for a client, or revive its soft-deleted registration.
    ///
    /// A live registration for the same URL is rejected with
    /// [`WebhookError::EndpointAlreadyPresent`]. Revival keeps the uuid and the
    /// existing secret.
    pub async fn add_endpoint(
        &self,
        client_id: i64,
        url: &str,
        status: Option<&str>,
    ) -> Result<EndpointView> {
        self.active_client(client_id).await?;
        let status = match status {
            Some(raw) => EndpointStatus::parse_requested(raw)?,
            None => EndpointStatus::Active,
        };
        let url = self.validate_url(url)?;

        let endpoint = match self.store.find_endpoint_by_url(client_id, &url).await? {
            Some(existing) if !existing.is_deleted() => {
                return Err(WebhookError::EndpointAlreadyPresent(url));
            }
            Some(mut existing) => {
                existing.status = existing.status.transition_to(status)?;
                existing.updated_at = Utc::now();
                self.store.update_endpoint(existing.clone()).await?;
                info!(
                    target: "webhook_registry",
                    client_id,
                    endpoint_uuid = %existing.uuid,
                    status = %existing.status,
                    "revived webhook endpoint"
                );
                existing
            }
            None => {
                let sealed = self.vault.seal_new_secret().await?;
                let endpoint =
                    Endpoint::new(client_id, url, sealed.secret, sealed.secret_salt, status);
                self.store.insert_endpoint(endpoint.clone()).await?;
                info!(
                    target: "webhook_registry",
                    client_id,
                    endpoint_uuid = %endpoint.uuid,
                    status = %endpoint.status,
                    "registered webhook endpoint"
                );
                endpoint
            }
        };

        self.invalidate(endpoint.uuid).await?;
        Ok(endpoint.view())
    }

    /// Look up an endpoint through the cache, including soft-deleted rows.
    pub async fn find_endpoint(&self, uuid: Uuid) -> Result<Option<Endpoint>> {
        let key = endpoint_cache_key(uuid);

        match pepo_cache::get::<_, Endpoint>(self.cache.as_ref(), &key).await {
            Ok(Some(endpoint)) => return Ok(Some(endpoint)),
            Ok(None) => {}
            Err(e) => {
                warn!(target: "webhook_registry", endpoint_uuid = %uuid, error = %e, "endpoint cache read failed");
            }
        }

        let Some(endpoint) = self.store.find_endpoint(uuid).await? else {
            return Ok(None);
        };
        let ttl = Some(self.config.cache_ttl);
        if let Err(e) = pepo_cache::set(self.cache.as_ref(), &key, &endpoint, ttl).await {
            warn!(target: "webhook_registry", endpoint_uuid = %uuid, error = %e, "endpoint cache write failed");
            return Ok(Some(endpoint));
        }

        // A write that landed between our read and the fill has already
        // invalidated the key, so the fill may hold an outdated row.
        let current = self.store.find_endpoint(uuid).await?;
        if current.as_ref() != Some(&endpoint) {
            debug!(target: "webhook_registry", endpoint_uuid = %uuid, "endpoint changed during cache fill");
            if let Err(e) = self.cache.delete(&key).await {
                warn!(target: "webhook_registry", endpoint_uuid = %uuid, error = %e, "endpoint cache invalidation failed");
            }
        }
        Ok(current)
    }

    /// Look up an endpoint through the cache.
    pub async fn get_endpoint(&self, uuid: Uuid) -> Result<Endpoint> {
        self.find_endpoint(uuid)
            .await?
            .ok_or(WebhookError::EndpointNotFound(uuid))
    }

    /// Non-deleted endpoints of a client.
    pub async fn list_endpoints(&self, client_id: i64) -> Result<Vec<EndpointView>> {
        self.active_client(client_id).await?;
        let endpoints = self.store.list_endpoints(client_id).await?;
        Ok(endpoints.iter().map(EndpointView::from).collect())
    }

    /// Pause or resume an endpoint.
    pub async fn update_endpoint_status(
        &self,
        client_id: i64,
        uuid: Uuid,
        status: &str,
    ) -> Result<EndpointView> {
        let status = EndpointStatus::parse_requested(status)?;
        let mut endpoint = self.owned_endpoint(client_id, uuid).await?;

        endpoint.status = endpoint.status.transition_to(status)?;
        endpoint.updated_at = Utc::now();
        self.store.update_endpoint(endpoint.clone()).await?;
        self.invalidate(uuid).await?;

        debug!(target: "webhook_registry", endpoint_uuid = %uuid, status = %endpoint.status, "endpoint status updated");
        Ok(endpoint.view())
    }

    /// Soft delete an endpoint and drop its subscriptions.
    pub async fn delete_endpoint(&self, client_id: i64, uuid: Uuid) -> Result<()> {
        let mut endpoint = self.owned_endpoint(client_id, uuid).await?;
        let now = Utc::now();

        endpoint.status = endpoint.status.transition_to(EndpointStatus::Deleted)?;
        endpoint.updated_at = now;
        self.store.update_endpoint(endpoint).await?;

        let live: Vec<i64> = self
            .store
            .list_subscriptions(uuid)
            .await?
            .into_iter()
            .filter(|s| s.is_active())
            .map(|s| s.id)
            .collect();
        if !live.is_empty() {
            self.store
                .set_subscription_status(&live, SubscriptionStatus::Deleted, now)
                .await?;
        }

        self.invalidate(uuid).await?;
        info!(target: "webhook_registry", client_id, endpoint_uuid = %uuid, subscriptions = live.len(), "deleted webhook endpoint");
        Ok(())
    }

    /// Replace the signing secret. The old secret keeps signing until the
    /// rotation window closes.
    pub async fn rotate_secret(&self, client_id: i64, uuid: Uuid) -> Result<EndpointView> {
        let mut endpoint = self.owned_endpoint(client_id, uuid).await?;
        let window = chrono::Duration::from_std(self.config.rotation_window)
            .map_err(|e| WebhookError::ConfigError(format!("rotation window: {e}")))?;
        let sealed = self.vault.seal_new_secret().await?;
        let now = Utc::now();

        endpoint.previous_secret = Some(std::mem::replace(&mut endpoint.secret, sealed.secret));
        endpoint.previous_secret_salt =
            Some(std::mem::replace(&mut endpoint.secret_salt, sealed.secret_salt));
        endpoint.previous_secret_expires_at = Some(now + window);
        endpoint.updated_at = now;

        self.store.update_endpoint(endpoint.clone()).await?;
        self.invalidate(uuid).await?;

        info!(target: "webhook_registry", client_id, endpoint_uuid = %uuid, "rotated endpoint secret");
        Ok(endpoint.view())
    }

    /// Plaintext secrets currently valid for an endpoint, oldest first, so the
    /// client can configure its receiver.
    pub async fn secret_for_receiver(&self, client_id: i64, uuid: Uuid) -> Result<Vec<String>> {
        let endpoint = self.owned_endpoint(client_id, uuid).await?;
        self.active_secrets(&endpoint, Utc::now()).await
    }

    /// Decrypt every secret valid at `now`, oldest first.
    pub async fn active_secrets(
        &self,
        endpoint: &Endpoint,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut secrets = Vec::with_capacity(2);
        for (secret, salt) in endpoint.sealed_secrets(now) {
            secrets.push(self.vault.open_secret(secret, salt).await?);
        }
        Ok(secrets)
    }

    /// Require an existing, active client.
    pub async fn active_client(&self, client_id: i64) -> Result<ApiClient> {
        let client = self
            .store
            .find_client(client_id)
            .await?
            .ok_or(WebhookError::ClientNotFound(client_id))?;
        if !client.is_active() {
            return Err(WebhookError::ClientInactive(client_id));
        }
        Ok(client)
    }

    /// Non-deleted endpoint owned by an active client, read from the store.
    pub async fn owned_endpoint(&self, client_id: i64, uuid: Uuid) -> Result<Endpoint> {
        self.active_client(client_id).await?;
        match self.store.find_endpoint(uuid).await? {
            Some(endpoint) if endpoint.client_id == client_id && !endpoint.is_deleted() => {
                Ok(endpoint)
            }
            _ => Err(WebhookError::EndpointNotFound(uuid)),
        }
    }

    /// Drop the cached row of an endpoint.
    pub async fn invalidate(&self, uuid: Uuid) -> Result<()> {
        self.cache.delete(&endpoint_cache_key(uuid)).await?;
        Ok(())
    }

    fn validate_url(&self, raw: &str) -> Result<String> {
        let trimmed = raw.trim();
        let parsed = Url::parse(trimmed)?;

        let scheme_ok = match parsed.scheme() {
            "https" => true,
            "http" => self.config.allow_http,
            _ => false,
        };
        if !scheme_ok {
            return Err(WebhookError::InvalidUrl(format!(
                "unsupported scheme {:?} in {trimmed}",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(WebhookError::InvalidUrl(format!("missing host in {trimmed}")));
        }
        Ok(trimmed.to_string())
    }
}
