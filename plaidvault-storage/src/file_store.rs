//! File-backed store: one directory per item under a single storage root.
//!
//! ```text
//! <root>/vault.salt
//! <root>/index.json                      item id -> directory, first-link order
//! <root>/items/<dir>/credential.enc      sealed credential (base64 text)
//! <root>/items/<dir>/cursor.json
//! <root>/items/<dir>/transactions.json   ledger + last committed batch
//! <root>/items/<dir>/balances.json
//! ```
//!
//! Every write replaces a whole file atomically. Read-modify-write cycles are
//! serialized by an internal mutex; this store assumes it is the only process
//! writing to its root.

use crate::error::{StorageError, StorageResult};
use crate::fs_util::{read_json, read_text, remove_if_exists, write_atomic, write_json};
use crate::ledger::{BalanceSheet, Merge, TransactionLedger};
use crate::models::{ApplyOutcome, BalanceSnapshot, DeltaBatch, SyncState, Transaction};
use crate::store::{check_item_id, CredentialStore, SyncStateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const SALT_FILE: &str = "vault.salt";
const INDEX_FILE: &str = "index.json";
const ITEMS_DIR: &str = "items";
const CREDENTIAL_FILE: &str = "credential.enc";
const CURSOR_FILE: &str = "cursor.json";
const TRANSACTIONS_FILE: &str = "transactions.json";
const BALANCES_FILE: &str = "balances.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ItemIndex {
    #[serde(default)]
    items: Vec<IndexEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct IndexEntry {
    item_id: String,
    dir: String,
    linked_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CursorRecord {
    item_id: String,
    cursor: String,
    updated_at: DateTime<Utc>,
}

/// File-backed implementation of [`SyncStateStore`] and [`CredentialStore`].
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

/// Directory name for an item: the id itself may contain anything.
fn item_dir_name(item_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(item_id.as_bytes()));
    digest[..32].to_string()
}

impl FileStore {
    /// Opens or creates a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(ITEMS_DIR))?;
        info!("file store opened at {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn item_dir(&self, item_id: &str) -> StorageResult<PathBuf> {
        check_item_id(item_id)?;
        Ok(self.root.join(ITEMS_DIR).join(item_dir_name(item_id)))
    }

    fn item_file(&self, item_id: &str, name: &str) -> StorageResult<PathBuf> {
        Ok(self.item_dir(item_id)?.join(name))
    }

    fn read_index(&self) -> StorageResult<ItemIndex> {
        Ok(read_json(&self.root.join(INDEX_FILE))?.unwrap_or_default())
    }

    fn write_index(&self, index: &ItemIndex) -> StorageResult<()> {
        write_json(&self.root.join(INDEX_FILE), index)
    }

    fn read_ledger(&self, item_id: &str) -> StorageResult<Option<TransactionLedger>> {
        let ledger: Option<TransactionLedger> = read_json(&self.item_file(item_id, TRANSACTIONS_FILE)?)?;
        if let Some(ref l) = ledger {
            ensure_owner(&l.item_id, item_id, TRANSACTIONS_FILE)?;
        }
        Ok(ledger)
    }

    fn read_cursor(&self, item_id: &str) -> StorageResult<Option<CursorRecord>> {
        let record: Option<CursorRecord> = read_json(&self.item_file(item_id, CURSOR_FILE)?)?;
        if let Some(ref r) = record {
            ensure_owner(&r.item_id, item_id, CURSOR_FILE)?;
        }
        Ok(record)
    }

    fn read_balances(&self, item_id: &str) -> StorageResult<Option<BalanceSheet>> {
        read_json(&self.item_file(item_id, BALANCES_FILE)?)
    }

    /// Removes the item directory if nothing is left in it.
    fn prune_item_dir(&self, item_id: &str) -> StorageResult<()> {
        let dir = self.item_dir(item_id)?;
        let is_empty = match std::fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if is_empty {
            std::fs::remove_dir(&dir)?;
        }
        Ok(())
    }
}

fn ensure_owner(found: &str, expected: &str, file: &str) -> StorageResult<()> {
    if found != expected {
        return Err(StorageError::Corrupt(format!(
            "{file} belongs to item {found:?}, expected {expected:?}"
        )));
    }
    Ok(())
}

impl SyncStateStore for FileStore {
    fn get_cursor(&self, item_id: &str) -> StorageResult<Option<String>> {
        Ok(self.read_cursor(item_id)?.map(|r| r.cursor))
    }

    fn set_cursor(&self, item_id: &str, cursor: &str) -> StorageResult<()> {
        let path = self.item_file(item_id, CURSOR_FILE)?;
        let _guard = self.lock()?;
        write_json(
            &path,
            &CursorRecord {
                item_id: item_id.to_string(),
                cursor: cursor.to_string(),
                updated_at: Utc::now(),
            },
        )?;
        debug!(item_id, "cursor stored");
        Ok(())
    }

    fn apply_deltas(&self, item_id: &str, batch: &DeltaBatch) -> StorageResult<ApplyOutcome> {
        let path = self.item_file(item_id, TRANSACTIONS_FILE)?;
        let _guard = self.lock()?;

        let ledger = self
            .read_ledger(item_id)?
            .unwrap_or_else(|| TransactionLedger::new(item_id));
        let cursor = self.read_cursor(item_id)?.map(|r| r.cursor);

        match ledger.merge(batch, cursor.as_deref(), Utc::now())? {
            Merge::Applied(merged, outcome) => {
                write_json(&path, &merged)?;
                debug!(
                    item_id,
                    added = outcome.added,
                    modified = outcome.modified,
                    removed = outcome.removed,
                    "delta batch committed"
                );
                Ok(outcome)
            }
            Merge::Replayed => Ok(ApplyOutcome {
                replayed: true,
                ..Default::default()
            }),
        }
    }

    fn get_transactions(&self, item_id: &str) -> StorageResult<Vec<Transaction>> {
        Ok(self
            .read_ledger(item_id)?
            .map(|l| l.transactions)
            .unwrap_or_default())
    }

    fn get_state(&self, item_id: &str) -> StorageResult<Option<SyncState>> {
        let ledger = self.read_ledger(item_id)?;
        let cursor = self.read_cursor(item_id)?;
        if ledger.is_none() && cursor.is_none() {
            return Ok(None);
        }
        let (transactions, last_synced_at) = ledger
            .map(|l| (l.transactions, l.last_synced_at))
            .unwrap_or_default();
        Ok(Some(SyncState {
            item_id: item_id.to_string(),
            cursor: cursor.map(|c| c.cursor),
            transactions,
            last_synced_at,
        }))
    }

    fn list_items(&self) -> StorageResult<Vec<String>> {
        let mut items = Vec::new();
        for entry in std::fs::read_dir(self.root.join(ITEMS_DIR))? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            if let Some(cursor) = read_json::<CursorRecord>(&dir.join(CURSOR_FILE))? {
                items.push(cursor.item_id);
            } else if let Some(ledger) = read_json::<TransactionLedger>(&dir.join(TRANSACTIONS_FILE))? {
                items.push(ledger.item_id);
            }
        }
        items.sort();
        Ok(items)
    }

    fn upsert_balances(&self, item_id: &str, snapshots: &[BalanceSnapshot]) -> StorageResult<()> {
        let path = self.item_file(item_id, BALANCES_FILE)?;
        let _guard = self.lock()?;
        let mut sheet = self
            .read_balances(item_id)?
            .unwrap_or_else(|| BalanceSheet::new(item_id));
        for snapshot in snapshots {
            sheet.upsert(snapshot.clone());
        }
        write_json(&path, &sheet)
    }

    fn replace_balances(&self, item_id: &str, snapshots: &[BalanceSnapshot]) -> StorageResult<()> {
        let path = self.item_file(item_id, BALANCES_FILE)?;
        let _guard = self.lock()?;
        let mut sheet = BalanceSheet::new(item_id);
        for snapshot in snapshots {
            sheet.upsert(snapshot.clone());
        }
        write_json(&path, &sheet)?;
        debug!(item_id, accounts = sheet.snapshots.len(), "balance set replaced");
        Ok(())
    }

    fn get_balances(
        &self,
        item_id: &str,
        account_ids: Option<&[String]>,
    ) -> StorageResult<Vec<BalanceSnapshot>> {
        Ok(self
            .read_balances(item_id)?
            .map(|sheet| sheet.select(account_ids))
            .unwrap_or_default())
    }

    fn remove_item(&self, item_id: &str) -> StorageResult<()> {
        let dir = self.item_dir(item_id)?;
        let _guard = self.lock()?;
        for name in [CURSOR_FILE, TRANSACTIONS_FILE, BALANCES_FILE] {
            remove_if_exists(&dir.join(name))?;
        }
        self.prune_item_dir(item_id)?;
        info!(item_id, "sync state removed");
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn load_or_init_salt(&self, candidate: &[u8]) -> StorageResult<Vec<u8>> {
        let path = self.root.join(SALT_FILE);
        let _guard = self.lock()?;
        if let Some(text) = read_text(&path)? {
            return hex::decode(text.trim())
                .map_err(|e| StorageError::Corrupt(format!("{SALT_FILE}: {e}")));
        }
        write_atomic(&path, hex::encode(candidate).as_bytes())?;
        info!("created new key salt at {}", path.display());
        Ok(candidate.to_vec())
    }

    fn put_credential(&self, item_id: &str, sealed: &str) -> StorageResult<()> {
        let path = self.item_file(item_id, CREDENTIAL_FILE)?;
        let _guard = self.lock()?;
        let mut index = self.read_index()?;
        let is_new = !index.items.iter().any(|e| e.item_id == item_id);

        write_atomic(&path, sealed.as_bytes())?;
        if !is_new {
            return Ok(());
        }

        index.items.push(IndexEntry {
            item_id: item_id.to_string(),
            dir: item_dir_name(item_id),
            linked_at: Utc::now(),
        });
        if let Err(e) = self.write_index(&index) {
            // A record the index does not list would be readable but never listed.
            if let Err(cleanup) = remove_if_exists(&path).and_then(|_| self.prune_item_dir(item_id)) {
                warn!(item_id, "could not remove unindexed credential record: {cleanup}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn get_credential(&self, item_id: &str) -> StorageResult<Option<String>> {
        read_text(&self.item_file(item_id, CREDENTIAL_FILE)?)
    }

    fn delete_credential(&self, item_id: &str) -> StorageResult<bool> {
        let path = self.item_file(item_id, CREDENTIAL_FILE)?;
        let _guard = self.lock()?;
        let existed = remove_if_exists(&path)?;

        let mut index = self.read_index()?;
        let before = index.items.len();
        index.items.retain(|e| e.item_id != item_id);
        if index.items.len() != before {
            self.write_index(&index)?;
        }

        self.prune_item_dir(item_id)?;
        Ok(existed)
    }

    fn list_credentials(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .read_index()?
            .items
            .into_iter()
            .map(|e| e.item_id)
            .collect())
    }
}
