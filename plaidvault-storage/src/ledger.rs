//! Per-item state documents and the delta merge.
//!
//! Both store implementations keep the same documents; only where they live
//! differs. Merging always happens on a copy so a failed batch leaves the
//! stored document untouched.

use crate::error::{StorageError, StorageResult};
use crate::models::{AppliedBatch, ApplyOutcome, BalanceSnapshot, DeltaBatch, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Transaction set of one item plus the marker of the last committed batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionLedger {
    pub item_id: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub last_batch: Option<LedgerBatch>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// [`AppliedBatch`] plus the cursor that was stored when it was applied.
///
/// A later batch with the same fingerprint is only a crash replay if the
/// cursor has not moved since: the cursor write that should have followed
/// the apply never happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBatch {
    #[serde(flatten)]
    pub batch: AppliedBatch,
    pub cursor_at_apply: Option<String>,
}

/// Result of merging a batch into a ledger.
#[derive(Debug)]
pub enum Merge {
    /// The batch was merged; commit the new ledger.
    Applied(TransactionLedger, ApplyOutcome),
    /// The batch is a re-delivery of the last committed one.
    Replayed,
}

impl TransactionLedger {
    pub fn new(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            transactions: Vec::new(),
            last_batch: None,
            last_synced_at: None,
        }
    }

    /// Merges `batch` into a copy of this ledger.
    ///
    /// Added ids must be new, modified ids replace in place (unknown ids are
    /// skipped with a warning), removed ids are deleted if present. Any
    /// duplicate aborts the whole merge.
    ///
    /// While the cursor has not moved since the last committed batch, the
    /// provider is re-serving that cursor's page after an interrupted sync.
    /// An added id that is already stored is then replaced in place and
    /// counted in [`ApplyOutcome::readded`] instead of failing.
    pub fn merge(
        &self,
        batch: &DeltaBatch,
        current_cursor: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<Merge> {
        let fingerprint = batch.fingerprint()?;
        let retrying = self.is_retry_window(current_cursor);

        if !batch.is_empty() && retrying && self.last_fingerprint_is(&fingerprint) {
            debug!(item_id = %self.item_id, "batch matches last committed batch, treating as replay");
            return Ok(Merge::Replayed);
        }

        let mut transactions = self.transactions.clone();
        let mut positions: HashMap<String, usize> = transactions
            .iter()
            .enumerate()
            .map(|(i, tx)| (tx.transaction_id.clone(), i))
            .collect();
        let mut outcome = ApplyOutcome::default();
        let mut seen_in_batch = HashSet::new();

        for tx in &batch.added {
            let id = tx.transaction_id.as_str();
            let duplicate = || StorageError::DuplicateTransaction {
                item_id: self.item_id.clone(),
                transaction_id: id.to_string(),
            };
            if !seen_in_batch.insert(id) {
                return Err(duplicate());
            }
            match positions.get(id).copied() {
                Some(i) if retrying => {
                    transactions[i] = tx.clone();
                    outcome.readded += 1;
                }
                Some(_) => return Err(duplicate()),
                None => {
                    positions.insert(id.to_string(), transactions.len());
                    transactions.push(tx.clone());
                    outcome.added += 1;
                }
            }
        }
        if outcome.readded > 0 {
            info!(
                item_id = %self.item_id,
                readded = outcome.readded,
                "re-delivered page after interrupted sync, stored transactions replaced"
            );
        }

        for tx in &batch.modified {
            match positions.get(&tx.transaction_id) {
                Some(&i) => {
                    transactions[i] = tx.clone();
                    outcome.modified += 1;
                }
                None => {
                    warn!(
                        item_id = %self.item_id,
                        transaction_id = %tx.transaction_id,
                        "modified delta for unknown transaction, ignoring"
                    );
                    outcome.modified_missing += 1;
                }
            }
        }

        let mut to_remove = HashSet::new();
        for id in &batch.removed {
            if positions.contains_key(id) {
                if to_remove.insert(id.as_str()) {
                    outcome.removed += 1;
                }
            } else {
                outcome.removed_missing += 1;
            }
        }
        if !to_remove.is_empty() {
            transactions.retain(|tx| !to_remove.contains(tx.transaction_id.as_str()));
        }

        // An empty page leaves the marker alone so it cannot reopen the
        // retry window for a cursor that was already committed.
        let last_batch = if batch.is_empty() {
            self.last_batch.clone()
        } else {
            Some(LedgerBatch {
                batch: AppliedBatch {
                    fingerprint,
                    applied_at: now,
                },
                cursor_at_apply: current_cursor.map(str::to_string),
            })
        };

        let merged = TransactionLedger {
            item_id: self.item_id.clone(),
            transactions,
            last_batch,
            last_synced_at: Some(now),
        };

        Ok(Merge::Applied(merged, outcome))
    }

    /// The last committed batch was applied at the cursor still stored, so
    /// the cursor write that should have followed it never happened.
    fn is_retry_window(&self, current_cursor: Option<&str>) -> bool {
        self.last_batch
            .as_ref()
            .is_some_and(|last| last.cursor_at_apply.as_deref() == current_cursor)
    }

    fn last_fingerprint_is(&self, fingerprint: &str) -> bool {
        self.last_batch
            .as_ref()
            .is_some_and(|last| last.batch.fingerprint == fingerprint)
    }
}

/// Balance snapshots of one item, one per account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub item_id: String,
    #[serde(default)]
    pub snapshots: Vec<BalanceSnapshot>,
}

impl BalanceSheet {
    pub fn new(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            snapshots: Vec::new(),
        }
    }

    /// Replaces the snapshot for the same account, or appends a new one.
    pub fn upsert(&mut self, snapshot: BalanceSnapshot) {
        match self
            .snapshots
            .iter_mut()
            .find(|s| s.account_id == snapshot.account_id)
        {
            Some(existing) => *existing = snapshot,
            None => self.snapshots.push(snapshot),
        }
    }

    pub fn select(&self, account_ids: Option<&[String]>) -> Vec<BalanceSnapshot> {
        match account_ids {
            Some(ids) => self
                .snapshots
                .iter()
                .filter(|s| ids.iter().any(|id| *id == s.account_id))
                .cloned()
                .collect(),
            None => self.snapshots.clone(),
        }
    }
}
