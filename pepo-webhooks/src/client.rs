//! Signed delivery client

use crate::event::MAX_STORED_BODY_LEN;
use crate::signature::{SIGNATURE_KIND, headers};
use crate::{
    ErrorResponse, Result, WebhookConfig, WebhookError, WebhookSignature, truncate_string,
};
use chrono::{DateTime, Utc};
use reqwest::{Client, redirect};
use tracing::{debug, info, warn};

/// Result of one delivery attempt.
///
/// Receiver-side problems are data, not errors: the dispatcher records them and
/// schedules a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Receiver answered 2xx
    Delivered {
        status_code: u16,
        body: Option<String>,
    },

    /// Timeout, connection failure or non-2xx answer
    Failed {
        status_code: Option<u16>,
        body: Option<String>,
        error: String,
    },
}

impl DeliveryOutcome {
    /// Check if the delivery succeeded
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Failure details for storage, if the attempt failed.
    pub fn error_response(&self) -> Option<ErrorResponse> {
        match self {
            Self::Delivered { .. } => None,
            Self::Failed {
                status_code,
                body,
                error,
            } => {
                let mut response = ErrorResponse::new(error.clone());
                if let Some(code) = status_code {
                    response = response.with_status(*code);
                }
                if let Some(body) = body {
                    response = response.with_body(body);
                }
                Some(response)
            }
        }
    }
}

/// HTTP client that signs and posts webhook bodies
#[derive(Debug, Clone)]
pub struct WebhookClient {
    config: WebhookConfig,
    http_client: Client,
}

impl WebhookClient {
    /// Create a client. Requests time out after `config.timeout` and redirects
    /// are never followed.
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            config: config.clone(),
            http_client,
        })
    }

    /// Sign and post `body` to `url` with every secret in `secrets`.
    pub async fn post(
        &self,
        url: &str,
        secrets: &[String],
        api_version: &str,
        body: &serde_json::Value,
    ) -> Result<DeliveryOutcome> {
        self.post_at(url, secrets, api_version, body, Utc::now())
            .await
    }

    /// Like [`WebhookClient::post`] with an explicit signing time.
    pub async fn post_at(
        &self,
        url: &str,
        secrets: &[String],
        api_version: &str,
        body: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<DeliveryOutcome> {
        let json_body = serde_json::to_string(body)?;

        if json_body.len() > self.config.max_payload_size {
            return Err(WebhookError::PayloadError(format!(
                "Payload too large: {} bytes (max: {})",
                json_body.len(),
                self.config.max_payload_size
            )));
        }

        let timestamp = now.timestamp();
        let signature = WebhookSignature::new(secrets.iter().cloned()).header_value(
            timestamp,
            api_version,
            &json_body,
        )?;

        let request = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header(headers::TIMESTAMP, timestamp.to_string())
            .header(headers::VERSION, api_version)
            .header(headers::SIGNATURE_KIND, SIGNATURE_KIND)
            .header(headers::SIGNATURE, signature)
            .body(json_body);

        debug!(target: "webhook_delivery", url = %url, secrets = secrets.len(), "posting webhook");

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .ok()
                    .filter(|b| !b.is_empty())
                    .map(|b| truncate_string(&b, MAX_STORED_BODY_LEN));

                if status.is_success() {
                    info!(target: "webhook_delivery", url = %url, status = status.as_u16(), "webhook delivered");
                    Ok(DeliveryOutcome::Delivered {
                        status_code: status.as_u16(),
                        body,
                    })
                } else {
                    warn!(target: "webhook_delivery", url = %url, status = status.as_u16(), "webhook rejected");
                    Ok(DeliveryOutcome::Failed {
                        status_code: Some(status.as_u16()),
                        body,
                        error: format!("HTTP {}", status.as_u16()),
                    })
                }
            }
            Err(e) if e.is_builder() => Err(WebhookError::HttpError(e)),
            Err(e) => {
                let error = if e.is_timeout() {
                    "timeout".to_string()
                } else if e.is_connect() {
                    format!("connection error: {e}")
                } else {
                    e.to_string()
                };
                warn!(target: "webhook_delivery", url = %url, error = %error, "webhook delivery failed");
                Ok(DeliveryOutcome::Failed {
                    status_code: e.status().map(|s| s.as_u16()),
                    body: None,
                    error,
                })
            }
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }
}
