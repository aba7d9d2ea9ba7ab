//! Device key management
//!
//! # Algorithms
//!
//! - **Key Derivation**: PBKDF2-HMAC-SHA256, salted with the device identifier
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption, 256-bit key)
//!
//! The derived key stays in process memory for the lifetime of the
//! [`KeyManager`]. It is zeroized on drop and never serialized or logged.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::{EngineConfig, DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS};
use crate::error::{EqError, Result};

/// Derived key length (32 bytes)
pub const KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Identifier recorded alongside every ciphertext
pub const ENCRYPTION_STANDARD: &str = "chacha20poly1305+pbkdf2-hmac-sha256";

/// Ciphertext and nonce, base64 encoded for storage and transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub nonce: String,
}

/// Derive a 256-bit key from a user secret with PBKDF2-HMAC-SHA256.
pub fn derive_device_key(
    secret: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(secret, salt, iterations, &mut key[..]);
    key
}

/// Holds the per-device key and performs authenticated encryption with it.
///
/// Every operation other than [`KeyManager::initialize`] fails with
/// [`EqError::EncryptionNotInitialized`] until a key has been derived.
pub struct KeyManager {
    iterations: u32,
    device_id: Option<String>,
    key: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("iterations", &self.iterations)
            .field("device_id", &self.device_id)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl KeyManager {
    /// Create an uninitialized key manager with the default iteration count
    pub fn new() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
            device_id: None,
            key: None,
        }
    }

    /// Create an uninitialized key manager with a custom iteration count
    pub fn with_iterations(iterations: u32) -> Result<Self> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(EqError::InvalidInput(format!(
                "key derivation needs at least {MIN_KDF_ITERATIONS} iterations, got {iterations}"
            )));
        }
        Ok(Self {
            iterations,
            device_id: None,
            key: None,
        })
    }

    /// Create an uninitialized key manager using the config's iteration count
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::with_iterations(config.kdf_iterations)
    }

    /// Derive the device key from a user secret.
    ///
    /// The derivation runs on a blocking worker so the async caller is not
    /// stalled. The device identifier is used as the salt.
    pub async fn initialize(&mut self, secret: &str, device_id: &str) -> Result<()> {
        if secret.is_empty() {
            return Err(EqError::InvalidInput("user secret must not be empty".into()));
        }
        if device_id.is_empty() {
            return Err(EqError::InvalidInput("device id must not be empty".into()));
        }

        let secret = Zeroizing::new(secret.as_bytes().to_vec());
        let salt = device_id.as_bytes().to_vec();
        let iterations = self.iterations;

        let key = tokio::task::spawn_blocking(move || {
            derive_device_key(&secret, &salt, iterations)
        })
        .await
        .map_err(|e| EqError::Crypto(format!("key derivation task failed: {e}")))?;

        self.key = Some(key);
        self.device_id = Some(device_id.to_string());

        info!(device_id, iterations, "Derived device key");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.key.is_some()
    }

    /// Device the key was derived for
    pub fn device_id(&self) -> Result<&str> {
        self.device_id
            .as_deref()
            .ok_or(EqError::EncryptionNotInitialized)
    }

    /// Drop the key from memory. Re-initialize to recover.
    pub fn reset(&mut self) {
        self.key = None;
        self.device_id = None;
        debug!("Device key cleared");
    }

    /// Short public fingerprint of the key (first 8 bytes of SHA-256, hex)
    pub fn fingerprint(&self) -> Result<String> {
        let key = self.key()?;
        let digest = Sha256::digest(&key[..]);
        Ok(hex::encode(&digest[..8]))
    }

    /// Encrypt bytes with a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let cipher = self.cipher()?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| EqError::Crypto(format!("encryption failed: {e}")))?;

        Ok(EncryptedBlob {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Decrypt and authenticate a blob produced by [`KeyManager::encrypt`]
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;

        let nonce = BASE64
            .decode(&blob.nonce)
            .map_err(|e| EqError::Crypto(format!("invalid nonce encoding: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(EqError::Crypto(format!(
                "invalid nonce length: expected {NONCE_LEN}, got {}",
                nonce.len()
            )));
        }
        let ciphertext = BASE64
            .decode(&blob.ciphertext)
            .map_err(|e| EqError::Crypto(format!("invalid ciphertext encoding: {e}")))?;

        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| EqError::Crypto("authentication failed (wrong key or tampered data)".into()))
    }

    /// Serialize a value to JSON and encrypt it
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<EncryptedBlob> {
        let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
        self.encrypt(&plaintext)
    }

    /// Decrypt a blob and deserialize the JSON inside
    pub fn decrypt_json<T: DeserializeOwned>(&self, blob: &EncryptedBlob) -> Result<T> {
        let plaintext = Zeroizing::new(self.decrypt(blob)?);
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn key(&self) -> Result<&[u8; KEY_LEN]> {
        self.key
            .as_deref()
            .ok_or(EqError::EncryptionNotInitialized)
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305> {
        let key = self.key()?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..])))
    }
}
