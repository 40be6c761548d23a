//! Persisted data model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single transaction as delivered by the provider.
///
/// `transaction_id` is the identity: it is unique within an item and stable
/// across syncs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub account_id: String,
    pub amount: f64,
    pub date: NaiveDate,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub pending: bool,
}

/// The `{added, modified, removed}` triple returned by one delta fetch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaBatch {
    #[serde(default)]
    pub added: Vec<Transaction>,
    #[serde(default)]
    pub modified: Vec<Transaction>,
    /// Transaction ids.
    #[serde(default)]
    pub removed: Vec<String>,
}

impl DeltaBatch {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Content hash of the batch, used to recognise an exact re-delivery.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Marker for the most recently committed batch of an item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedBatch {
    pub fingerprint: String,
    pub applied_at: DateTime<Utc>,
}

/// What `apply_deltas` did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub added: usize,
    pub modified: usize,
    /// `modified` deltas whose id was not stored locally (ignored).
    pub modified_missing: usize,
    pub removed: usize,
    /// `removed` ids that were not stored locally (ignored).
    pub removed_missing: usize,
    /// `added` deltas for ids already stored, accepted because the page was
    /// re-served after an interrupted sync.
    pub readded: usize,
    /// The batch was identical to the last committed one and was skipped.
    pub replayed: bool,
}

/// Full sync state of one item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub item_id: String,
    pub cursor: Option<String>,
    pub transactions: Vec<Transaction>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Cached balance of one account of an item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub item_id: String,
    pub account_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
    pub available: Option<f64>,
    pub current: Option<f64>,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
    pub captured_at: DateTime<Utc>,
}
