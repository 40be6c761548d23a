//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the sync-state and credential stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An `added` delta named a transaction that is already stored. Outside a
    /// crash-recovery replay this means the upstream feed or the stored cursor
    /// is inconsistent.
    #[error("duplicate transaction {transaction_id} for item {item_id}")]
    DuplicateTransaction {
        item_id: String,
        transaction_id: String,
    },

    /// A persisted file exists but cannot be interpreted.
    #[error("corrupt state: {0}")]
    Corrupt(String),

    #[error("invalid item id: {0:?}")]
    InvalidItemId(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// True for errors that indicate damaged state or an upstream protocol
    /// violation, as opposed to an environmental failure.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            StorageError::DuplicateTransaction { .. } | StorageError::Corrupt(_)
        )
    }
}
