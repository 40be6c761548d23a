//! In-memory store. Nothing survives the process; used in tests and for
//! ephemeral sessions.

use crate::error::{StorageError, StorageResult};
use crate::ledger::{BalanceSheet, Merge, TransactionLedger};
use crate::models::{ApplyOutcome, BalanceSnapshot, DeltaBatch, SyncState, Transaction};
use crate::store::{check_item_id, CredentialStore, SyncStateStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct ItemSlot {
    cursor: Option<String>,
    ledger: Option<TransactionLedger>,
    balances: Option<BalanceSheet>,
    credential: Option<String>,
}

impl ItemSlot {
    fn has_sync_state(&self) -> bool {
        self.cursor.is_some() || self.ledger.is_some()
    }

    fn is_vacant(&self) -> bool {
        !self.has_sync_state() && self.balances.is_none() && self.credential.is_none()
    }
}

#[derive(Default)]
struct Inner {
    items: HashMap<String, ItemSlot>,
    /// Credential ids in first-store order.
    index: Vec<String>,
    salt: Option<Vec<u8>>,
}

/// Memory-backed implementation of [`SyncStateStore`] and [`CredentialStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StorageError::LockPoisoned)
    }
}

impl Inner {
    fn prune(&mut self, item_id: &str) {
        if self.items.get(item_id).is_some_and(ItemSlot::is_vacant) {
            self.items.remove(item_id);
        }
    }
}

impl SyncStateStore for MemoryStore {
    fn get_cursor(&self, item_id: &str) -> StorageResult<Option<String>> {
        check_item_id(item_id)?;
        Ok(self.read()?.items.get(item_id).and_then(|s| s.cursor.clone()))
    }

    fn set_cursor(&self, item_id: &str, cursor: &str) -> StorageResult<()> {
        check_item_id(item_id)?;
        self.write()?
            .items
            .entry(item_id.to_string())
            .or_default()
            .cursor = Some(cursor.to_string());
        Ok(())
    }

    fn apply_deltas(&self, item_id: &str, batch: &DeltaBatch) -> StorageResult<ApplyOutcome> {
        check_item_id(item_id)?;
        let mut inner = self.write()?;
        let slot = inner.items.entry(item_id.to_string()).or_default();

        let merge = match slot.ledger.as_ref() {
            Some(ledger) => ledger.merge(batch, slot.cursor.as_deref(), Utc::now()),
            None => TransactionLedger::new(item_id).merge(batch, slot.cursor.as_deref(), Utc::now()),
        };

        match merge {
            Ok(Merge::Applied(merged, outcome)) => {
                slot.ledger = Some(merged);
                Ok(outcome)
            }
            Ok(Merge::Replayed) => Ok(ApplyOutcome {
                replayed: true,
                ..Default::default()
            }),
            Err(e) => {
                inner.prune(item_id);
                Err(e)
            }
        }
    }

    fn get_transactions(&self, item_id: &str) -> StorageResult<Vec<Transaction>> {
        check_item_id(item_id)?;
        Ok(self
            .read()?
            .items
            .get(item_id)
            .and_then(|s| s.ledger.as_ref())
            .map(|l| l.transactions.clone())
            .unwrap_or_default())
    }

    fn get_state(&self, item_id: &str) -> StorageResult<Option<SyncState>> {
        check_item_id(item_id)?;
        let inner = self.read()?;
        let Some(slot) = inner.items.get(item_id).filter(|s| s.has_sync_state()) else {
            return Ok(None);
        };
        Ok(Some(SyncState {
            item_id: item_id.to_string(),
            cursor: slot.cursor.clone(),
            transactions: slot
                .ledger
                .as_ref()
                .map(|l| l.transactions.clone())
                .unwrap_or_default(),
            last_synced_at: slot.ledger.as_ref().and_then(|l| l.last_synced_at),
        }))
    }

    fn list_items(&self) -> StorageResult<Vec<String>> {
        let mut items: Vec<String> = self
            .read()?
            .items
            .iter()
            .filter(|(_, slot)| slot.has_sync_state())
            .map(|(id, _)| id.clone())
            .collect();
        items.sort();
        Ok(items)
    }

    fn upsert_balances(&self, item_id: &str, snapshots: &[BalanceSnapshot]) -> StorageResult<()> {
        check_item_id(item_id)?;
        let mut inner = self.write()?;
        let sheet = inner
            .items
            .entry(item_id.to_string())
            .or_default()
            .balances
            .get_or_insert_with(|| BalanceSheet::new(item_id));
        for snapshot in snapshots {
            sheet.upsert(snapshot.clone());
        }
        Ok(())
    }

    fn replace_balances(&self, item_id: &str, snapshots: &[BalanceSnapshot]) -> StorageResult<()> {
        check_item_id(item_id)?;
        let mut sheet = BalanceSheet::new(item_id);
        for snapshot in snapshots {
            sheet.upsert(snapshot.clone());
        }
        self.write()?
            .items
            .entry(item_id.to_string())
            .or_default()
            .balances = Some(sheet);
        Ok(())
    }

    fn get_balances(
        &self,
        item_id: &str,
        account_ids: Option<&[String]>,
    ) -> StorageResult<Vec<BalanceSnapshot>> {
        check_item_id(item_id)?;
        Ok(self
            .read()?
            .items
            .get(item_id)
            .and_then(|s| s.balances.as_ref())
            .map(|sheet| sheet.select(account_ids))
            .unwrap_or_default())
    }

    fn remove_item(&self, item_id: &str) -> StorageResult<()> {
        check_item_id(item_id)?;
        let mut inner = self.write()?;
        if let Some(slot) = inner.items.get_mut(item_id) {
            slot.cursor = None;
            slot.ledger = None;
            slot.balances = None;
        }
        inner.prune(item_id);
        Ok(())
    }
}

impl CredentialStore for MemoryStore {
    fn load_or_init_salt(&self, candidate: &[u8]) -> StorageResult<Vec<u8>> {
        let mut inner = self.write()?;
        Ok(inner.salt.get_or_insert_with(|| candidate.to_vec()).clone())
    }

    fn put_credential(&self, item_id: &str, sealed: &str) -> StorageResult<()> {
        check_item_id(item_id)?;
        let mut inner = self.write()?;
        inner
            .items
            .entry(item_id.to_string())
            .or_default()
            .credential = Some(sealed.to_string());
        if !inner.index.iter().any(|id| id == item_id) {
            inner.index.push(item_id.to_string());
        }
        Ok(())
    }

    fn get_credential(&self, item_id: &str) -> StorageResult<Option<String>> {
        check_item_id(item_id)?;
        Ok(self
            .read()?
            .items
            .get(item_id)
            .and_then(|s| s.credential.clone()))
    }

    fn delete_credential(&self, item_id: &str) -> StorageResult<bool> {
        check_item_id(item_id)?;
        let mut inner = self.write()?;
        let existed = inner
            .items
            .get_mut(item_id)
            .and_then(|s| s.credential.take())
            .is_some();
        inner.index.retain(|id| id != item_id);
        inner.prune(item_id);
        Ok(existed)
    }

    fn list_credentials(&self) -> StorageResult<Vec<String>> {
        Ok(self.read()?.index.clone())
    }
}
