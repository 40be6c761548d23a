//! Storage interfaces. Callers depend on these, never on a concrete backend.

use crate::error::{StorageError, StorageResult};
use crate::models::{ApplyOutcome, BalanceSnapshot, DeltaBatch, SyncState, Transaction};

/// Durable per-item sync state: cursor, transaction set, balance snapshots.
///
/// Freshness of balances is not this trait's concern; `set_balance` and
/// `get_balances` are plain overwrite and read.
pub trait SyncStateStore: Send + Sync {
    fn get_cursor(&self, item_id: &str) -> StorageResult<Option<String>>;

    /// Unconditionally replaces the stored cursor.
    fn set_cursor(&self, item_id: &str, cursor: &str) -> StorageResult<()>;

    /// Applies one delta batch as a single unit.
    ///
    /// Readers observe either the state before the batch or the state after
    /// it, never a mix. On error nothing is changed.
    fn apply_deltas(&self, item_id: &str, batch: &DeltaBatch) -> StorageResult<ApplyOutcome>;

    fn get_transactions(&self, item_id: &str) -> StorageResult<Vec<Transaction>>;

    fn get_state(&self, item_id: &str) -> StorageResult<Option<SyncState>>;

    /// Items that have any sync state (a cursor or a transaction set).
    fn list_items(&self) -> StorageResult<Vec<String>>;

    /// Upserts the snapshot for `(item_id, snapshot.account_id)`.
    fn set_balance(&self, item_id: &str, snapshot: &BalanceSnapshot) -> StorageResult<()> {
        self.upsert_balances(item_id, std::slice::from_ref(snapshot))
    }

    /// Upserts every snapshot in one write. Accounts not in `snapshots` keep
    /// their stored value.
    fn upsert_balances(&self, item_id: &str, snapshots: &[BalanceSnapshot]) -> StorageResult<()>;

    /// Replaces the item's whole balance set in one write. Accounts not in
    /// `snapshots` are dropped.
    fn replace_balances(&self, item_id: &str, snapshots: &[BalanceSnapshot]) -> StorageResult<()>;

    /// Snapshots of the item, optionally restricted to `account_ids`.
    fn get_balances(
        &self,
        item_id: &str,
        account_ids: Option<&[String]>,
    ) -> StorageResult<Vec<BalanceSnapshot>>;

    fn get_balance(&self, item_id: &str, account_id: &str) -> StorageResult<Option<BalanceSnapshot>> {
        let wanted = [account_id.to_string()];
        Ok(self.get_balances(item_id, Some(&wanted))?.into_iter().next())
    }

    /// Drops cursor, transactions, and balances of the item. Idempotent.
    fn remove_item(&self, item_id: &str) -> StorageResult<()>;
}

/// Opaque sealed credential records keyed by item id, plus the storage
/// root's KDF salt. Encryption happens above this layer.
pub trait CredentialStore: Send + Sync {
    /// Returns the persisted salt, persisting `candidate` first if none exists.
    fn load_or_init_salt(&self, candidate: &[u8]) -> StorageResult<Vec<u8>>;

    /// Writes (or overwrites) the sealed record and records the item in the
    /// index if it is new.
    fn put_credential(&self, item_id: &str, sealed: &str) -> StorageResult<()>;

    fn get_credential(&self, item_id: &str) -> StorageResult<Option<String>>;

    /// Returns whether a record existed.
    fn delete_credential(&self, item_id: &str) -> StorageResult<bool>;

    /// Item ids in the order they were first stored.
    fn list_credentials(&self) -> StorageResult<Vec<String>>;
}

pub(crate) fn check_item_id(item_id: &str) -> StorageResult<()> {
    if item_id.trim().is_empty() {
        return Err(StorageError::InvalidItemId(item_id.to_string()));
    }
    Ok(())
}
