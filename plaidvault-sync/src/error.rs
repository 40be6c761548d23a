//! Sync error types.

use plaidvault_storage::StorageError;
use plaidvault_vault::VaultError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while linking, syncing, or reading balances.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No credential is stored for the item. A normal, reportable condition.
    #[error("item {0} is not linked")]
    UnlinkedItem(String),

    #[error("API request failed: {0}")]
    Api(String),

    /// The provider answered with a structured error body.
    #[error("provider error {code}: {message}")]
    Provider { code: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] plaidvault_crypto::CryptoError),

    /// A blocking storage task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Damaged local state or an upstream protocol violation.
    pub fn is_integrity(&self) -> bool {
        match self {
            SyncError::Vault(e) => e.is_integrity(),
            SyncError::Storage(e) => e.is_integrity(),
            _ => false,
        }
    }

    /// The provider call failed; nothing local was changed.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            SyncError::Api(_) | SyncError::Provider { .. } | SyncError::Http(_)
        )
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}
