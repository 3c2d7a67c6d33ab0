//! Error types for webhook operations

use pepo_cache::CacheError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during webhook operations
#[derive(Error, Debug)]
pub enum WebhookError {
    /// HTTP client could not be built or a request could not be prepared
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Status value is not a member of the enum, or not allowed here
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Status change not permitted by the transition table
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Topic kind is not one of the known kinds
    #[error("Unknown topic kind: {0}")]
    UnknownTopicKind(String),

    /// Request failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Client does not exist
    #[error("Client not found: {0}")]
    ClientNotFound(i64),

    /// Client exists but is not active
    #[error("Client is not active: {0}")]
    ClientInactive(i64),

    /// Endpoint does not exist, is deleted, or belongs to another client
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(Uuid),

    /// Endpoint exists but is not active
    #[error("Endpoint is not active: {0}")]
    EndpointInactive(Uuid),

    /// A live endpoint is already registered for this client and URL
    #[error("Endpoint already present for URL: {0}")]
    EndpointAlreadyPresent(String),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Timestamp outside the accepted window
    #[error("Timestamp validation failed: {0}")]
    TimestampInvalid(String),

    /// Key management service or local cipher failure
    #[error("Vault error: {0}")]
    Vault(String),

    /// Relational store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Cache failure
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Payload serialization/deserialization failed, or payload too large
    #[error("Payload error: {0}")]
    PayloadError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Stable snake_case code returned to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HttpError(_) => "http_error",
            Self::InvalidUrl(_) => "invalid_url",
            Self::InvalidStatus(_) => "invalid_status",
            Self::InvalidTransition { .. } => "invalid_status_transition",
            Self::UnknownTopicKind(_) => "unknown_topic_kind",
            Self::Validation(_) => "validation_error",
            Self::ClientNotFound(_) => "client_not_found",
            Self::ClientInactive(_) => "client_inactive",
            Self::EndpointNotFound(_) => "endpoint_not_found",
            Self::EndpointInactive(_) => "endpoint_inactive",
            Self::EndpointAlreadyPresent(_) => "endpoint_already_present",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::TimestampInvalid(_) => "timestamp_invalid",
            Self::Vault(_) => "vault_error",
            Self::Store(_) => "store_error",
            Self::Cache(_) => "cache_error",
            Self::PayloadError(_) => "payload_error",
            Self::ConfigError(_) => "config_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the error is a rejected request that was never persisted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::InvalidStatus(_)
                | Self::InvalidTransition { .. }
                | Self::UnknownTopicKind(_)
                | Self::Validation(_)
                | Self::ClientNotFound(_)
                | Self::ClientInactive(_)
                | Self::EndpointNotFound(_)
                | Self::EndpointInactive(_)
        )
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_) | Self::Vault(_) | Self::Store(_) | Self::Cache(_)
        )
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::PayloadError(err.to_string())
    }
}

impl From<url::ParseError> for WebhookError {
    fn from(err: url::ParseError) -> Self {
        WebhookError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_code() {
        let err = WebhookError::EndpointAlreadyPresent("https://example.com/hook".to_string());
        assert_eq!(err.code(), "endpoint_already_present");
        assert!(!err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_classification() {
        assert!(WebhookError::UnknownTopicKind("tag_audio".to_string()).is_validation());
        assert!(WebhookError::ClientInactive(1).is_validation());
        assert!(!WebhookError::Vault("kms unreachable".to_string()).is_validation());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(WebhookError::Vault("kms unreachable".to_string()).is_retryable());
        assert!(WebhookError::Store("deadlock".to_string()).is_retryable());
        assert!(!WebhookError::PayloadError("too large".to_string()).is_retryable());
    }

    #[test]
    fn test_url_parse_error_conversion() {
        let err: WebhookError = url::Url::parse("not a url").unwrap_err().into();
        assert_eq!(err.code(), "invalid_url");
    }
}
