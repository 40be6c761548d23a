//! Encrypted credential vault.
//!
//! Maps item ids to access credentials. Records are sealed with a key derived
//! once per storage root from the configured secret; the key never leaves the
//! vault and the backing [`CredentialStore`] only ever sees base64 ciphertext.
//!
//! A record is `{item_id, access_token, metadata, created_at}` as JSON,
//! encrypted with ChaCha20-Poly1305 under an Argon2id-derived key.

use chrono::{DateTime, Utc};
use plaidvault_crypto::{
    decrypt_string, derive_key, encrypt_string, CryptoError, DerivedKey, EncryptedData,
    KdfParams, Salt, SALT_SIZE,
};
use plaidvault_storage::{CredentialStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// A record exists for the item but cannot be turned back into a
    /// credential: bad encoding, failed authentication, bad JSON, or a record
    /// that names a different item.
    #[error("corrupt credential record for item {item_id}: {reason}")]
    CorruptRecord { item_id: String, reason: String },
    #[error("invalid item id: {0:?}")]
    InvalidItemId(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// True for errors that mean stored data is damaged.
    pub fn is_integrity(&self) -> bool {
        match self {
            VaultError::CorruptRecord { .. } => true,
            VaultError::Storage(e) => e.is_integrity(),
            _ => false,
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

// ============================================================================
// Credential
// ============================================================================

/// A linked item's access credential plus caller metadata.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub item_id: String,
    pub access_token: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("item_id", &self.item_id)
            .field("access_token", &"[REDACTED]")
            .field("metadata", &self.metadata)
            .field("created_at", &self.created_at)
            .finish()
    }
}

// ============================================================================
// CredentialVault
// ============================================================================

/// Encrypted credential records keyed by item id.
pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
    key: DerivedKey,
}

fn check_item_id(item_id: &str) -> VaultResult<()> {
    if item_id.trim().is_empty() {
        return Err(VaultError::InvalidItemId(item_id.to_string()));
    }
    Ok(())
}

impl CredentialVault {
    /// Opens the vault over `store`, creating the root's salt on first use,
    /// and derives the record key from `secret`.
    ///
    /// Key derivation is slow; call this once at startup.
    pub fn open(
        secret: &str,
        store: Arc<dyn CredentialStore>,
        kdf: &KdfParams,
    ) -> VaultResult<Self> {
        let candidate = Salt::random();
        let salt_bytes = store.load_or_init_salt(candidate.as_bytes())?;
        let salt_bytes: [u8; SALT_SIZE] = salt_bytes.as_slice().try_into().map_err(|_| {
            StorageError::Corrupt(format!(
                "key salt is {} bytes, expected {SALT_SIZE}",
                salt_bytes.len()
            ))
        })?;

        let key = derive_key(secret, &Salt::from_bytes(salt_bytes), kdf)?;
        info!("credential vault opened");
        Ok(Self { store, key })
    }

    /// Seals and writes the credential for `item_id`, replacing any previous
    /// record.
    pub fn store(
        &self,
        item_id: &str,
        access_token: &str,
        metadata: BTreeMap<String, String>,
    ) -> VaultResult<Credential> {
        check_item_id(item_id)?;
        let credential = Credential {
            item_id: item_id.to_string(),
            access_token: access_token.to_string(),
            metadata,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&credential)?;
        let sealed = encrypt_string(&self.key, &json)?.encode();
        self.store.put_credential(item_id, &sealed)?;

        debug!(item_id, "credential stored");
        Ok(credential)
    }

    /// Returns the credential for `item_id`, or `None` if none was stored.
    pub fn get(&self, item_id: &str) -> VaultResult<Option<Credential>> {
        check_item_id(item_id)?;
        let Some(sealed) = self.store.get_credential(item_id)? else {
            return Ok(None);
        };

        let corrupt = |reason: String| {
            warn!(item_id, %reason, "credential record unreadable");
            VaultError::CorruptRecord {
                item_id: item_id.to_string(),
                reason,
            }
        };

        let data = EncryptedData::decode(&sealed).map_err(|e| corrupt(e.to_string()))?;
        let json = decrypt_string(&self.key, &data).map_err(|e| corrupt(e.to_string()))?;
        let credential: Credential =
            serde_json::from_str(&json).map_err(|e| corrupt(e.to_string()))?;

        if credential.item_id != item_id {
            return Err(corrupt(format!(
                "record belongs to item {:?}",
                credential.item_id
            )));
        }
        Ok(Some(credential))
    }

    /// Deletes the record. Returns whether one existed.
    pub fn remove(&self, item_id: &str) -> VaultResult<bool> {
        check_item_id(item_id)?;
        let existed = self.store.delete_credential(item_id)?;
        if existed {
            info!(item_id, "credential removed");
        }
        Ok(existed)
    }

    /// Item ids in the order they were first stored.
    pub fn list_items(&self) -> VaultResult<Vec<String>> {
        Ok(self.store.list_credentials()?)
    }

    pub fn contains(&self, item_id: &str) -> VaultResult<bool> {
        check_item_id(item_id)?;
        Ok(self.store.get_credential(item_id)?.is_some())
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}
