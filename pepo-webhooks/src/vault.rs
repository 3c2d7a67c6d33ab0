//! Envelope encryption for endpoint secrets.
//!
//! Each endpoint secret is encrypted locally (AES-256-GCM) with a fresh data
//! key. The data key itself is wrapped by a [`KeyManagementService`]; only the
//! wrapped key (`secret_salt`) and the ciphertext (`secret`) are persisted. The
//! plaintext data key lives for a single operation and is zeroized on drop.

use crate::{Result, WebhookError};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// AES-256 key size.
const KEY_SIZE: usize = 32;

/// Random bytes in a generated endpoint secret.
const SECRET_BYTES: usize = 32;

/// A data key as returned by the key management service.
pub struct DataKey {
    /// Plaintext key; use once, never persist
    pub plaintext: Zeroizing<Vec<u8>>,

    /// Key wrapped by the master key; safe to persist
    pub ciphertext: String,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &"<redacted>")
            .field("ciphertext", &self.ciphertext)
            .finish()
    }
}

/// Master key service that issues and unwraps data keys.
#[async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Generate a new data key.
    async fn generate_data_key(&self) -> Result<DataKey>;

    /// Unwrap a previously generated data key.
    async fn decrypt_data_key(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>>;
}

/// Symmetric cipher used with plaintext data keys.
///
/// Output format: base64(nonce || ciphertext || auth_tag)
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCipher;

impl LocalCipher {
    /// Encrypt raw bytes.
    pub fn encrypt_bytes(key: &[u8], plaintext: &[u8]) -> Result<String> {
        let cipher = Self::cipher(key)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| WebhookError::Vault(format!("encryption failed: {e}")))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&result))
    }

    /// Decrypt bytes produced by [`LocalCipher::encrypt_bytes`].
    pub fn decrypt_bytes(key: &[u8], encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
        let cipher = Self::cipher(key)?;

        let encrypted = BASE64
            .decode(encoded)
            .map_err(|e| WebhookError::Vault(format!("base64 decode failed: {e}")))?;

        if encrypted.len() <= NONCE_SIZE {
            return Err(WebhookError::Vault(
                "invalid encrypted data format".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| WebhookError::Vault(format!("decryption failed: {e}")))?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Encrypt a UTF-8 value.
    pub fn encrypt(key: &[u8], value: &str) -> Result<String> {
        Self::encrypt_bytes(key, value.as_bytes())
    }

    /// Decrypt a UTF-8 value.
    pub fn decrypt(key: &[u8], encoded: &str) -> Result<String> {
        let bytes = Self::decrypt_bytes(key, encoded)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| WebhookError::Vault(format!("decrypted value is not UTF-8: {e}")))
    }

    fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
        if key.len() != KEY_SIZE {
            return Err(WebhookError::Vault(format!(
                "invalid key length: expected {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        Aes256Gcm::new_from_slice(key).map_err(|e| WebhookError::Vault(e.to_string()))
    }
}

/// In-process key management service.
///
/// Wraps data keys with a single AES-256 master key. Intended for development
/// and tests; production deployments plug in a managed KMS.
pub struct LocalKms {
    master_key: Zeroizing<Vec<u8>>,
}

impl LocalKms {
    /// Create from raw master key bytes (32 bytes).
    pub fn new(master_key: &[u8]) -> Result<Self> {
        if master_key.len() != KEY_SIZE {
            return Err(WebhookError::ConfigError(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                master_key.len()
            )));
        }
        Ok(Self {
            master_key: Zeroizing::new(master_key.to_vec()),
        })
    }

    /// Create from a base64-encoded master key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| WebhookError::ConfigError(format!("invalid master key: {e}")))?,
        );
        Self::new(&bytes)
    }

    /// Create from the `PEPO_VAULT_MASTER_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let encoded = Zeroizing::new(std::env::var("PEPO_VAULT_MASTER_KEY").map_err(|_| {
            WebhookError::ConfigError("PEPO_VAULT_MASTER_KEY is not set".to_string())
        })?);
        Self::from_base64(&encoded)
    }

    /// Create with a random master key. Data keys do not survive a restart.
    pub fn ephemeral() -> Self {
        let mut key = Zeroizing::new(vec![0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut key);
        Self { master_key: key }
    }
}

#[async_trait]
impl KeyManagementService for LocalKms {
    async fn generate_data_key(&self) -> Result<DataKey> {
        let mut plaintext = Zeroizing::new(vec![0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut plaintext);
        let ciphertext = LocalCipher::encrypt_bytes(&self.master_key, &plaintext)?;
        Ok(DataKey {
            plaintext,
            ciphertext,
        })
    }

    async fn decrypt_data_key(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>> {
        LocalCipher::decrypt_bytes(&self.master_key, ciphertext)
    }
}

/// Persisted form of an endpoint secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    /// Secret encrypted with the data key
    pub secret: String,

    /// Data key wrapped by the master key
    pub secret_salt: String,
}

/// Vault adapter combining the key management service and the local cipher.
#[derive(Clone)]
pub struct SecretVault {
    kms: Arc<dyn KeyManagementService>,
}

impl SecretVault {
    /// Create a vault backed by the given key management service.
    pub fn new(kms: Arc<dyn KeyManagementService>) -> Self {
        Self { kms }
    }

    /// Generate a data key.
    pub async fn generate_data_key(&self) -> Result<DataKey> {
        self.kms.generate_data_key().await
    }

    /// Encrypt a value with a plaintext data key.
    pub fn encrypt(&self, plaintext_key: &[u8], value: &str) -> Result<String> {
        LocalCipher::encrypt(plaintext_key, value)
    }

    /// Decrypt a value with a plaintext data key.
    pub fn decrypt(&self, plaintext_key: &[u8], ciphertext: &str) -> Result<String> {
        LocalCipher::decrypt(plaintext_key, ciphertext)
    }

    /// Generate a fresh random secret and seal it under a new data key.
    pub async fn seal_new_secret(&self) -> Result<SealedSecret> {
        let data_key = self.generate_data_key().await?;
        let secret = Zeroizing::new(generate_secret());
        let sealed = SealedSecret {
            secret: self.encrypt(&data_key.plaintext, &secret)?,
            secret_salt: data_key.ciphertext,
        };
        debug!(target: "webhook_vault", "sealed new endpoint secret");
        Ok(sealed)
    }

    /// Recover the plaintext of a sealed secret.
    pub async fn open_secret(&self, secret: &str, secret_salt: &str) -> Result<String> {
        let key = self.kms.decrypt_data_key(secret_salt).await?;
        let plaintext = self.decrypt(&key, secret)?;
        if plaintext.is_empty() {
            return Err(WebhookError::Vault(
                "decrypted secret is empty".to_string(),
            ));
        }
        Ok(plaintext)
    }
}

/// Generate a random high-entropy secret (hex encoded).
pub fn generate_secret() -> String {
    let mut bytes = Zeroizing::new([0u8; SECRET_BYTES]);
    OsRng.fill_bytes(bytes.as_mut());
    hex::encode(bytes.as_ref())
}
