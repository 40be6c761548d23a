//! Per-item sync orchestration.
//!
//! One call to [`SyncEngine::sync_item`] moves an item forward by exactly one
//! provider page:
//!
//! ```text
//! LoadingCursor -> FetchingDeltas -> Applying -> PersistingCursor -> Done
//!       \________________\________________\______________\-> Failed
//! ```
//!
//! The item's lock is held from the cursor load until the cursor write. The
//! apply and the cursor write run in a single blocking task that owns the
//! lock guard, so once the commit has started neither a dropped caller nor a
//! concurrent sync can separate the two.

use crate::error::{SyncError, SyncResult};
use crate::locks::ItemLocks;
use crate::provider::{PageRequest, Provider};
use plaidvault_storage::{ApplyOutcome, DeltaBatch, SyncStateStore};
use plaidvault_vault::CredentialVault;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a sync call currently is, or where it stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    LoadingCursor,
    FetchingDeltas,
    Applying,
    PersistingCursor,
    Done,
    Failed,
}

/// Per-call options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Ask the provider to refresh from the institution before fetching.
    /// A failed refresh is logged and the sync continues.
    pub force_refresh: bool,
    /// Overrides the configured history window for this call.
    pub days_requested: Option<u32>,
}

/// What one sync call did.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncReport {
    pub item_id: String,
    /// The page as delivered by the provider.
    pub batch: DeltaBatch,
    /// What the store did with it.
    pub outcome: ApplyOutcome,
    pub next_cursor: String,
    /// More pages are waiting; call again to continue.
    pub has_more: bool,
    pub item_status: String,
}

impl SyncReport {
    /// The page was a re-delivery of an already committed batch.
    pub fn replayed(&self) -> bool {
        self.outcome.replayed
    }

    /// Human-readable summary of what was stored, e.g.
    /// `"Added 2, Removed 1 transactions"`. Deltas the store skipped are not
    /// counted.
    pub fn summary(&self) -> String {
        if self.outcome.replayed {
            return "No new transactions (page already applied)".to_string();
        }
        let counts = [
            ("Added", self.outcome.added),
            ("Re-applied", self.outcome.readded),
            ("Modified", self.outcome.modified),
            ("Removed", self.outcome.removed),
        ];
        let parts: Vec<String> = counts
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(label, n)| format!("{label} {n}"))
            .collect();
        if parts.is_empty() {
            return "No new transactions".to_string();
        }
        format!("{} transactions", parts.join(", "))
    }
}

/// Stateless orchestrator over the vault, the sync-state store, and the
/// provider. Its only state is the per-item lock table.
pub struct SyncEngine {
    vault: Arc<CredentialVault>,
    store: Arc<dyn SyncStateStore>,
    provider: Arc<dyn Provider>,
    locks: ItemLocks,
    page: PageRequest,
}

impl SyncEngine {
    pub fn new(
        vault: Arc<CredentialVault>,
        store: Arc<dyn SyncStateStore>,
        provider: Arc<dyn Provider>,
        page: PageRequest,
    ) -> Self {
        Self {
            vault,
            store,
            provider,
            locks: ItemLocks::new(),
            page,
        }
    }

    pub fn locks(&self) -> &ItemLocks {
        &self.locks
    }

    /// Fetches and commits one page of deltas for `item_id`.
    ///
    /// Does not follow `has_more`; see [`sync_until_complete`](Self::sync_until_complete).
    pub async fn sync_item(&self, item_id: &str, options: &SyncOptions) -> SyncResult<SyncReport> {
        let mut phase = SyncPhase::LoadingCursor;
        match self.run(item_id, options, &mut phase).await {
            Ok(report) => {
                info!(
                    item_id,
                    has_more = report.has_more,
                    replayed = report.replayed(),
                    "sync done: {}",
                    report.summary()
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    item_id,
                    phase = ?SyncPhase::Failed,
                    failed_in = ?phase,
                    "sync failed: {e}"
                );
                Err(e)
            }
        }
    }

    /// Repeats [`sync_item`](Self::sync_item) while the provider reports more
    /// pages, up to `max_pages` calls. `force_refresh` only applies to the
    /// first page.
    pub async fn sync_until_complete(
        &self,
        item_id: &str,
        options: &SyncOptions,
        max_pages: usize,
    ) -> SyncResult<Vec<SyncReport>> {
        if max_pages == 0 {
            return Err(SyncError::Config("max_pages must be at least 1".into()));
        }

        let mut reports = Vec::new();
        let mut options = options.clone();
        while reports.len() < max_pages {
            let report = self.sync_item(item_id, &options).await?;
            let has_more = report.has_more;
            reports.push(report);
            if !has_more {
                break;
            }
            options.force_refresh = false;
        }
        Ok(reports)
    }

    async fn run(
        &self,
        item_id: &str,
        options: &SyncOptions,
        phase: &mut SyncPhase,
    ) -> SyncResult<SyncReport> {
        let guard = self.locks.acquire(item_id).await;

        let vault = self.vault.clone();
        let id = item_id.to_string();
        let credential = tokio::task::spawn_blocking(move || vault.get(&id))
            .await??
            .ok_or_else(|| SyncError::UnlinkedItem(item_id.to_string()))?;

        if options.force_refresh {
            match self.provider.trigger_refresh(&credential.access_token).await {
                Ok(()) => debug!(item_id, "upstream refresh triggered"),
                Err(e) => warn!(item_id, "upstream refresh failed, syncing anyway: {e}"),
            }
        }

        debug!(item_id, phase = ?phase, "loading cursor");
        let store = self.store.clone();
        let id = item_id.to_string();
        let cursor = tokio::task::spawn_blocking(move || store.get_cursor(&id)).await??;

        *phase = SyncPhase::FetchingDeltas;
        debug!(item_id, phase = ?phase, initial = cursor.is_none(), "fetching deltas");
        let page = PageRequest {
            page_size: self.page.page_size,
            days_requested: options.days_requested.or(self.page.days_requested),
        };
        let delta = self
            .provider
            .fetch_deltas(&credential.access_token, cursor.as_deref(), &page)
            .await?;
        if delta.next_cursor.is_empty() {
            return Err(SyncError::Api("provider returned an empty cursor".into()));
        }

        *phase = SyncPhase::Applying;
        debug!(item_id, phase = ?phase, "committing page");
        let store = self.store.clone();
        let id = item_id.to_string();
        let batch = delta.batch.clone();
        let next_cursor = delta.next_cursor.clone();
        let commit = tokio::task::spawn_blocking(
            move || -> Result<ApplyOutcome, (SyncPhase, SyncError)> {
                let _guard = guard;
                let outcome = store
                    .apply_deltas(&id, &batch)
                    .map_err(|e| (SyncPhase::Applying, SyncError::from(e)))?;
                if outcome.replayed {
                    info!(item_id = %id, "page was already applied before an interrupted sync");
                }
                debug!(item_id = %id, phase = ?SyncPhase::PersistingCursor, "persisting cursor");
                store
                    .set_cursor(&id, &next_cursor)
                    .map_err(|e| (SyncPhase::PersistingCursor, SyncError::from(e)))?;
                Ok(outcome)
            },
        );
        // A failed cursor write leaves the old cursor in place; the next call
        // re-fetches this page and the store recognises it as a replay.
        let outcome = commit.await?.map_err(|(failed_in, e)| {
            *phase = failed_in;
            e
        })?;

        *phase = SyncPhase::Done;
        Ok(SyncReport {
            item_id: item_id.to_string(),
            batch: delta.batch,
            outcome,
            next_cursor: delta.next_cursor,
            has_more: delta.has_more,
            item_status: delta.item_status,
        })
    }
}
