//! TTL view over the store's balance snapshots.
//!
//! The store keeps whatever was last written; this layer decides whether
//! that is still fresh enough to serve without asking the provider.

use crate::error::{SyncError, SyncResult};
use crate::provider::AccountBalance;
use chrono::{DateTime, TimeDelta, Utc};
use plaidvault_storage::{BalanceSnapshot, SyncStateStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Snapshots read from the cache.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedBalances {
    pub snapshots: Vec<BalanceSnapshot>,
    /// Every snapshot is within the TTL.
    pub fresh: bool,
    /// Capture time of the oldest snapshot.
    pub captured_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BalanceCache {
    store: Arc<dyn SyncStateStore>,
    ttl: TimeDelta,
}

impl BalanceCache {
    pub fn new(store: Arc<dyn SyncStateStore>, ttl: Duration) -> SyncResult<Self> {
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|e| SyncError::Config(format!("balance cache TTL out of range: {e}")))?;
        Ok(Self { store, ttl })
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// A snapshot is fresh while `now - captured_at <= ttl`.
    pub fn is_fresh(&self, snapshot: &BalanceSnapshot, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(snapshot.captured_at) <= self.ttl
    }

    /// All cached snapshots of the item. Stale snapshots are returned too,
    /// flagged through [`CachedBalances::fresh`].
    pub fn read(&self, item_id: &str) -> SyncResult<Option<CachedBalances>> {
        self.read_accounts(item_id, None)
    }

    /// Like [`read`](Self::read), restricted to `account_ids`. When a
    /// requested account has no snapshot the result is reported stale.
    pub fn read_accounts(
        &self,
        item_id: &str,
        account_ids: Option<&[String]>,
    ) -> SyncResult<Option<CachedBalances>> {
        let snapshots = self.store.get_balances(item_id, account_ids)?;
        let Some(captured_at) = snapshots.iter().map(|s| s.captured_at).min() else {
            return Ok(None);
        };

        let now = Utc::now();
        let complete = account_ids.is_none_or(|ids| {
            ids.iter()
                .all(|id| snapshots.iter().any(|s| s.account_id == *id))
        });
        let fresh = complete && snapshots.iter().all(|s| self.is_fresh(s, now));

        debug!(item_id, accounts = snapshots.len(), fresh, "balance cache read");
        Ok(Some(CachedBalances {
            snapshots,
            fresh,
            captured_at,
        }))
    }

    /// Stores the provider's full account list for the item, stamped with
    /// the current time. Accounts the provider no longer reports are dropped.
    pub fn refresh(
        &self,
        item_id: &str,
        balances: &[AccountBalance],
    ) -> SyncResult<Vec<BalanceSnapshot>> {
        let snapshots = stamp(item_id, balances, Utc::now());
        self.store.replace_balances(item_id, &snapshots)?;
        debug!(item_id, accounts = snapshots.len(), "balance cache replaced");
        Ok(snapshots)
    }

    /// Like [`refresh`](Self::refresh) for a filtered fetch: only the given
    /// accounts are updated, the rest of the cached set is kept.
    pub fn refresh_accounts(
        &self,
        item_id: &str,
        balances: &[AccountBalance],
    ) -> SyncResult<Vec<BalanceSnapshot>> {
        let snapshots = stamp(item_id, balances, Utc::now());
        self.store.upsert_balances(item_id, &snapshots)?;
        debug!(item_id, accounts = snapshots.len(), "balance cache updated");
        Ok(snapshots)
    }
}

fn stamp(item_id: &str, balances: &[AccountBalance], now: DateTime<Utc>) -> Vec<BalanceSnapshot> {
    balances
        .iter()
        .map(|balance| BalanceSnapshot {
            item_id: item_id.to_string(),
            account_id: balance.account_id.clone(),
            name: balance.name.clone(),
            mask: balance.mask.clone(),
            account_type: balance.account_type.clone(),
            available: balance.available,
            current: balance.current,
            iso_currency_code: balance.iso_currency_code.clone(),
            captured_at: now,
        })
        .collect()
}
