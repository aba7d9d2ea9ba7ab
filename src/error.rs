//! Error types for EQ Vault

use thiserror::Error;

/// Errors that can occur while computing, storing or sharing EQ data
#[derive(Debug, Error)]
pub enum EqError {
    /// The key manager was used before a key was derived. Recoverable by
    /// initializing the key manager again.
    #[error("Encryption not initialized: derive a device key first")]
    EncryptionNotInitialized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A sync, aggregation, research or monetization entry point was called
    /// without explicit consent.
    #[error("Explicit consent required: {0}")]
    ConsentRequired(String),

    #[error("Insufficient participants for k-anonymity: {participants} < {minimum}")]
    InsufficientParticipants { participants: usize, minimum: usize },

    /// Sync conditions (Wi-Fi, frequency cap) are not met right now.
    #[error("Sync deferred: {0}")]
    SyncDeferred(String),

    #[error("Sync failed after {attempts} attempts: {reason}")]
    SyncFailed { attempts: u32, reason: String },

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EqError {
    /// Whether the caller may retry the same operation later unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, EqError::SyncDeferred(_))
    }

    /// Whether this error is a privacy or consent gate refusing to act
    pub fn is_privacy_refusal(&self) -> bool {
        matches!(
            self,
            EqError::ConsentRequired(_) | EqError::InsufficientParticipants { .. }
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, EqError>;
