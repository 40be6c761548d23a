//! Caller-facing operations: link, sync, balances, unlink.
//!
//! [`VaultService`] wires the vault, the sync-state store, the balance cache,
//! the engine, and a provider together from one [`VaultConfig`].

use crate::balance_cache::BalanceCache;
use crate::config::VaultConfig;
use crate::engine::{SyncEngine, SyncOptions, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::plaid_client::PlaidClient;
use crate::provider::{PageRequest, Provider};
use chrono::{DateTime, Utc};
use plaidvault_storage::{BalanceSnapshot, CredentialStore, FileStore, SyncStateStore, Transaction};
use plaidvault_vault::{Credential, CredentialVault};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Metadata key for the institution name given at link time.
pub const INSTITUTION_KEY: &str = "institution";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinkedItem {
    pub item_id: String,
    pub institution: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BalanceReport {
    pub balances: Vec<BalanceSnapshot>,
    /// Served from the cache without calling the provider.
    pub cached: bool,
    /// Capture time of the served balances.
    pub timestamp: DateTime<Utc>,
}

pub struct VaultService {
    vault: Arc<CredentialVault>,
    store: Arc<dyn SyncStateStore>,
    provider: Arc<dyn Provider>,
    cache: BalanceCache,
    engine: SyncEngine,
}

/// Runs storage and vault work off the async worker threads.
async fn blocking<T, F>(f: F) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

impl VaultService {
    /// File-backed service talking to Plaid.
    pub fn open(config: VaultConfig) -> SyncResult<Self> {
        config.validate()?;
        let provider = Arc::new(PlaidClient::new(&config.provider)?);
        Self::with_provider(config, provider)
    }

    /// File-backed service with a caller-supplied provider.
    pub fn with_provider(config: VaultConfig, provider: Arc<dyn Provider>) -> SyncResult<Self> {
        let store = Arc::new(FileStore::open(&config.storage_root)?);
        Self::from_parts(config, store.clone(), store, provider)
    }

    /// Assembles the service over explicit backends.
    pub fn from_parts(
        config: VaultConfig,
        credentials: Arc<dyn CredentialStore>,
        store: Arc<dyn SyncStateStore>,
        provider: Arc<dyn Provider>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let vault = Arc::new(CredentialVault::open(
            &config.encryption_secret,
            credentials,
            &config.kdf,
        )?);
        let cache = BalanceCache::new(store.clone(), config.balance_ttl())?;
        let engine = SyncEngine::new(
            vault.clone(),
            store.clone(),
            provider.clone(),
            PageRequest {
                page_size: config.provider.page_size,
                days_requested: Some(config.provider.days_requested),
            },
        );

        info!(
            root = %config.storage_root.display(),
            environment = ?config.provider.environment,
            ttl_secs = config.balance_cache_ttl_secs,
            "vault service ready"
        );
        Ok(Self {
            vault,
            store,
            provider,
            cache,
            engine,
        })
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn balance_cache(&self) -> &BalanceCache {
        &self.cache
    }

    /// Exchanges a one-time public token and stores the resulting credential.
    pub async fn link_item(
        &self,
        public_token: &str,
        institution_name: Option<&str>,
    ) -> SyncResult<LinkedItem> {
        let exchange = self.provider.exchange_token(public_token).await?;
        let institution = institution_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("Unknown")
            .to_string();

        let metadata = BTreeMap::from([(INSTITUTION_KEY.to_string(), institution.clone())]);
        let vault = self.vault.clone();
        let item_id = exchange.item_id.clone();
        blocking(move || Ok(vault.store(&item_id, &exchange.access_token, metadata)?)).await?;

        info!(item_id = %exchange.item_id, %institution, "item linked");
        Ok(LinkedItem {
            item_id: exchange.item_id,
            institution,
        })
    }

    /// One page of deltas; see [`SyncEngine::sync_item`].
    pub async fn sync_item(&self, item_id: &str, options: &SyncOptions) -> SyncResult<SyncReport> {
        self.engine.sync_item(item_id, options).await
    }

    /// Balances of the item, served from the cache while fresh.
    ///
    /// `force_refresh` skips the cache. An unfiltered fetch replaces the
    /// item's cached set, so accounts the provider stopped reporting are
    /// dropped. Provider failures are returned as errors; a stale cache entry
    /// is never served in their place.
    pub async fn get_balances(
        &self,
        item_id: &str,
        account_ids: Option<&[String]>,
        force_refresh: bool,
    ) -> SyncResult<BalanceReport> {
        let credential = self.credential(item_id).await?;
        let requested: Option<Vec<String>> = account_ids
            .filter(|ids| !ids.is_empty())
            .map(<[String]>::to_vec);

        if !force_refresh {
            let cache = self.cache.clone();
            let id = item_id.to_string();
            let ids = requested.clone();
            let hit = blocking(move || cache.read_accounts(&id, ids.as_deref())).await?;
            if let Some(hit) = hit.filter(|hit| hit.fresh) {
                return Ok(BalanceReport {
                    balances: hit.snapshots,
                    cached: true,
                    timestamp: hit.captured_at,
                });
            }
        }

        let fetched = self
            .provider
            .fetch_balances(&credential.access_token, requested.as_deref())
            .await
            .inspect_err(|e| warn!(item_id, "balance fetch failed: {e}"))?;

        let cache = self.cache.clone();
        let id = item_id.to_string();
        let filtered = requested.is_some();
        let balances = blocking(move || {
            if filtered {
                cache.refresh_accounts(&id, &fetched)
            } else {
                cache.refresh(&id, &fetched)
            }
        })
        .await?;
        let timestamp = balances
            .first()
            .map(|b| b.captured_at)
            .unwrap_or_else(Utc::now);

        info!(item_id, accounts = balances.len(), "balances refreshed");
        Ok(BalanceReport {
            balances,
            cached: false,
            timestamp,
        })
    }

    /// Forgets the item: credential, cursor, transactions, and balances.
    /// Returns whether a credential existed.
    pub async fn unlink_item(&self, item_id: &str) -> SyncResult<bool> {
        let guard = self.engine.locks().acquire(item_id).await;
        let vault = self.vault.clone();
        let store = self.store.clone();
        let id = item_id.to_string();
        let existed = blocking(move || {
            let _guard = guard;
            let existed = vault.remove(&id)?;
            store.remove_item(&id)?;
            Ok(existed)
        })
        .await?;

        info!(item_id, existed, "item unlinked");
        Ok(existed)
    }

    /// Linked items in link order.
    pub async fn list_items(&self) -> SyncResult<Vec<String>> {
        let vault = self.vault.clone();
        blocking(move || Ok(vault.list_items()?)).await
    }

    pub async fn get_transactions(&self, item_id: &str) -> SyncResult<Vec<Transaction>> {
        let store = self.store.clone();
        let id = item_id.to_string();
        blocking(move || Ok(store.get_transactions(&id)?)).await
    }

    async fn credential(&self, item_id: &str) -> SyncResult<Credential> {
        let vault = self.vault.clone();
        let id = item_id.to_string();
        blocking(move || Ok(vault.get(&id)?))
            .await?
            .ok_or_else(|| SyncError::UnlinkedItem(item_id.to_string()))
    }
}
