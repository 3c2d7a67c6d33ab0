//! Webhook signature generation and verification
//!
//! The signed string is `timestamp.api_version.json_body`. An endpoint may hold
//! more than one valid secret (during a rotation window), so one HMAC-SHA256
//! digest is produced per secret and the lowercase hex digests are joined with
//! commas in the signature header. Receivers accept the request if any digest
//! matches a secret they know.

use crate::{Result, WebhookError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Value of the `api-signature-kind` header.
pub const SIGNATURE_KIND: &str = "PEPO-WEBHOOK-HMAC-SHA256";

/// Header names sent with every delivery
pub mod headers {
    /// Unix timestamp (seconds) that was signed
    pub const TIMESTAMP: &str = "pepo-timestamp";

    /// API version that was signed
    pub const VERSION: &str = "pepo-version";

    /// Signature scheme
    pub const SIGNATURE_KIND: &str = "api-signature-kind";

    /// Comma-separated hex digests
    pub const SIGNATURE: &str = "pepo-signature";
}

/// Webhook signature utilities
#[derive(Clone)]
pub struct WebhookSignature {
    secrets: Vec<String>,
}

impl std::fmt::Debug for WebhookSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSignature")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl WebhookSignature {
    /// Create a signer over every given secret, in order.
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secrets: secrets.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a signer with a single secret.
    pub fn single(secret: impl Into<String>) -> Self {
        Self {
            secrets: vec![secret.into()],
        }
    }

    /// Number of secrets held.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether no secret is held.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// The string that is signed.
    pub fn canonical_string(timestamp: i64, api_version: &str, body: &str) -> String {
        format!("{timestamp}.{api_version}.{body}")
    }

    /// One lowercase hex digest per secret, in secret order.
    pub fn digests(&self, timestamp: i64, api_version: &str, body: &str) -> Result<Vec<String>> {
        let canonical = Self::canonical_string(timestamp, api_version, body);
        self.secrets
            .iter()
            .map(|secret| compute_hmac_sha256(secret, canonical.as_bytes()))
            .collect()
    }

    /// Value for the signature header.
    pub fn header_value(&self, timestamp: i64, api_version: &str, body: &str) -> Result<String> {
        if self.secrets.is_empty() {
            return Err(WebhookError::Internal(
                "no signing secret available".to_string(),
            ));
        }
        Ok(self.digests(timestamp, api_version, body)?.join(","))
    }

    /// Verify a received delivery against the secrets held by the receiver.
    ///
    /// `timestamp` and `signature` are the raw header values. Succeeds if any
    /// supplied digest matches any local secret and the timestamp is within
    /// `tolerance_secs` of `now`.
    pub fn verify(
        &self,
        timestamp: &str,
        api_version: &str,
        body: &str,
        signature: &str,
        tolerance_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let timestamp: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookError::TimestampInvalid("Invalid timestamp format".to_string()))?;

        let age = (now.timestamp() - timestamp).unsigned_abs();
        if age > tolerance_secs {
            return Err(WebhookError::TimestampInvalid(format!(
                "Timestamp outside tolerance: {age} seconds (tolerance: {tolerance_secs} seconds)"
            )));
        }

        let supplied: Vec<&str> = signature
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if supplied.is_empty() {
            return Err(WebhookError::SignatureInvalid(
                "Missing signature".to_string(),
            ));
        }

        let expected = self.digests(timestamp, api_version, body)?;
        let matched = expected
            .iter()
            .any(|e| supplied.iter().any(|s| constant_time_compare(s, e)));

        if matched {
            Ok(())
        } else {
            Err(WebhookError::SignatureInvalid(
                "No signature matches a known secret".to_string(),
            ))
        }
    }
}

/// Compute HMAC-SHA256 as lowercase hex
fn compute_hmac_sha256(secret: &str, data: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Internal(format!("HMAC key rejected: {e}")))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
