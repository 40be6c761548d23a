//! Durable per-item sync state for plaidvault.
//!
//! Holds, for every linked item, the provider cursor, the transaction set
//! built up from delta batches, and the latest balance snapshot of each
//! account. The same backends also hold the sealed credential records the
//! vault produces; encryption happens in `plaidvault-vault`, never here.
//!
//! # Architecture
//!
//! - [`SyncStateStore`] and [`CredentialStore`] are the only seams callers use
//! - [`FileStore`] keeps one directory per item and replaces files atomically
//! - [`MemoryStore`] keeps everything in a lock-protected map
//! - Both merge delta batches through the same ledger logic, so replay and
//!   duplicate handling cannot drift between backends

mod error;
mod file_store;
mod fs_util;
mod ledger;
mod memory_store;
mod models;
mod store;

pub use error::{StorageError, StorageResult};
pub use file_store::FileStore;
pub use ledger::{BalanceSheet, LedgerBatch, Merge, TransactionLedger};
pub use memory_store::MemoryStore;
pub use models::{
    AppliedBatch, ApplyOutcome, BalanceSnapshot, DeltaBatch, SyncState, Transaction,
};
pub use store::{CredentialStore, SyncStateStore};
