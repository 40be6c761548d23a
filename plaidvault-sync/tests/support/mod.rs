//! Shared test helpers: a scripted provider and a store that can be made to
//! fail at chosen points.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use plaidvault_crypto::KdfParams;
use plaidvault_storage::{
    ApplyOutcome, BalanceSnapshot, DeltaBatch, MemoryStore, StorageError, StorageResult,
    SyncState, SyncStateStore, Transaction,
};
use plaidvault_sync::{
    AccountBalance, DeltaPage, PageRequest, Provider, ProviderConfig, SyncEngine, SyncError,
    SyncResult, TokenExchange, VaultConfig,
};
use plaidvault_vault::CredentialVault;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

pub const SECRET: &str = "sync-tests-secret-0123456789abcdef";

pub fn tx(id: &str, amount: f64) -> Transaction {
    Transaction {
        transaction_id: id.into(),
        account_id: "acc_checking".into(),
        amount,
        date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        merchant_name: Some("Tea House".into()),
        category: Some("FOOD_AND_DRINK".into()),
        pending: false,
    }
}

pub fn page(added: Vec<Transaction>, removed: Vec<&str>, next: &str, has_more: bool) -> DeltaPage {
    DeltaPage {
        batch: DeltaBatch {
            added,
            modified: vec![],
            removed: removed.into_iter().map(String::from).collect(),
        },
        next_cursor: next.into(),
        has_more,
        item_status: "HISTORICAL_UPDATE_COMPLETE".into(),
    }
}

pub fn account(id: &str, current: f64) -> AccountBalance {
    AccountBalance {
        account_id: id.into(),
        name: Some(format!("Account {id}")),
        mask: Some("1234".into()),
        account_type: Some("depository".into()),
        available: Some(current - 5.0),
        current: Some(current),
        iso_currency_code: Some("USD".into()),
    }
}

pub fn ids(txs: &[Transaction]) -> Vec<String> {
    let mut ids: Vec<String> = txs.iter().map(|t| t.transaction_id.clone()).collect();
    ids.sort();
    ids
}

pub fn test_config(root: &Path) -> VaultConfig {
    VaultConfig {
        storage_root: root.to_path_buf(),
        encryption_secret: SECRET.into(),
        balance_cache_ttl_secs: 300,
        kdf: KdfParams::insecure_fast(),
        provider: ProviderConfig {
            client_id: "client-id".into(),
            secret: "provider-secret".into(),
            ..Default::default()
        },
    }
}

// ── Scripted provider ────────────────────────────────────────────

/// Blocks `fetch_deltas` until the test lets it through.
pub struct Gate {
    pub entered: Notify,
    pub release: Semaphore,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    pub fn open_one(&self) {
        self.release.add_permits(1);
    }
}

/// Provider whose responses are scripted per cursor.
#[derive(Default)]
pub struct MockProvider {
    pages: Mutex<HashMap<Option<String>, DeltaPage>>,
    balances: Mutex<Vec<AccountBalance>>,
    gate: Mutex<Option<Arc<Gate>>>,
    pub cursors_seen: Mutex<Vec<Option<String>>>,
    pub page_requests: Mutex<Vec<PageRequest>>,
    pub fetch_calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub fail_balances: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, cursor: Option<&str>, page: DeltaPage) {
        self.pages
            .lock()
            .unwrap()
            .insert(cursor.map(String::from), page);
    }

    pub fn set_balances(&self, balances: Vec<AccountBalance>) {
        *self.balances.lock().unwrap() = balances;
    }

    pub fn set_gate(&self, gate: Arc<Gate>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn clear_gate(&self) {
        *self.gate.lock().unwrap() = None;
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn exchange_token(&self, public_token: &str) -> SyncResult<TokenExchange> {
        match public_token.strip_prefix("public-") {
            Some(suffix) => Ok(TokenExchange {
                access_token: format!("access-{suffix}"),
                item_id: format!("item-{suffix}"),
            }),
            None => Err(SyncError::Provider {
                code: "INVALID_PUBLIC_TOKEN".into(),
                message: "provided public token is in an invalid format".into(),
            }),
        }
    }

    async fn fetch_deltas(
        &self,
        _access_token: &str,
        cursor: Option<&str>,
        page: &PageRequest,
    ) -> SyncResult<DeltaPage> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.cursors_seen
            .lock()
            .unwrap()
            .push(cursor.map(String::from));
        self.page_requests.lock().unwrap().push(*page);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            let permit = gate.release.acquire().await.unwrap();
            permit.forget();
        }

        self.pages
            .lock()
            .unwrap()
            .get(&cursor.map(String::from))
            .cloned()
            .ok_or_else(|| SyncError::Provider {
                code: "TRANSACTIONS_SYNC_MUTATION_DURING_PAGINATION".into(),
                message: format!("no page scripted for cursor {cursor:?}"),
            })
    }

    async fn fetch_balances(
        &self,
        _access_token: &str,
        account_ids: Option<&[String]>,
    ) -> SyncResult<Vec<AccountBalance>> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_balances.load(Ordering::SeqCst) {
            return Err(SyncError::Api("/accounts/balance/get returned 500".into()));
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .iter()
            .filter(|b| account_ids.is_none_or(|ids| ids.contains(&b.account_id)))
            .cloned()
            .collect())
    }

    async fn trigger_refresh(&self, _access_token: &str) -> SyncResult<()> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(SyncError::Provider {
                code: "PRODUCTS_NOT_SUPPORTED".into(),
                message: "refresh not available".into(),
            });
        }
        Ok(())
    }
}

// ── Store with injected failures ─────────────────────────────────

/// Memory store whose next cursor write can be made to fail, standing in for
/// a crash between apply and cursor persist.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_next_set_cursor: AtomicBool,
}

impl SyncStateStore for FlakyStore {
    fn get_cursor(&self, item_id: &str) -> StorageResult<Option<String>> {
        self.inner.get_cursor(item_id)
    }

    fn set_cursor(&self, item_id: &str, cursor: &str) -> StorageResult<()> {
        if self.fail_next_set_cursor.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk went away")));
        }
        self.inner.set_cursor(item_id, cursor)
    }

    fn apply_deltas(&self, item_id: &str, batch: &DeltaBatch) -> StorageResult<ApplyOutcome> {
        self.inner.apply_deltas(item_id, batch)
    }

    fn get_transactions(&self, item_id: &str) -> StorageResult<Vec<Transaction>> {
        self.inner.get_transactions(item_id)
    }

    fn get_state(&self, item_id: &str) -> StorageResult<Option<SyncState>> {
        self.inner.get_state(item_id)
    }

    fn list_items(&self) -> StorageResult<Vec<String>> {
        self.inner.list_items()
    }

    fn upsert_balances(&self, item_id: &str, snapshots: &[BalanceSnapshot]) -> StorageResult<()> {
        self.inner.upsert_balances(item_id, snapshots)
    }

    fn replace_balances(&self, item_id: &str, snapshots: &[BalanceSnapshot]) -> StorageResult<()> {
        self.inner.replace_balances(item_id, snapshots)
    }

    fn get_balances(
        &self,
        item_id: &str,
        account_ids: Option<&[String]>,
    ) -> StorageResult<Vec<BalanceSnapshot>> {
        self.inner.get_balances(item_id, account_ids)
    }

    fn remove_item(&self, item_id: &str) -> StorageResult<()> {
        self.inner.remove_item(item_id)
    }
}

// ── Engine fixture ───────────────────────────────────────────────

pub struct Fixture {
    pub vault: Arc<CredentialVault>,
    pub store: Arc<FlakyStore>,
    pub provider: Arc<MockProvider>,
    pub engine: Arc<SyncEngine>,
}

/// Engine over in-memory backends with `it_1` linked to `tok_abc`.
pub fn fixture() -> Fixture {
    plaidvault_sync::logging::init_tracing();
    let vault = Arc::new(
        CredentialVault::open(SECRET, Arc::new(MemoryStore::new()), &KdfParams::insecure_fast())
            .unwrap(),
    );
    vault.store("it_1", "tok_abc", BTreeMap::new()).unwrap();

    let store = Arc::new(FlakyStore::default());
    let provider = MockProvider::new();
    let engine = Arc::new(SyncEngine::new(
        vault.clone(),
        store.clone(),
        provider.clone(),
        PageRequest {
            page_size: 500,
            days_requested: Some(90),
        },
    ));

    Fixture {
        vault,
        store,
        provider,
        engine,
    }
}
