//! The upstream data provider as seen by the engine.
//!
//! The engine and the service only depend on [`Provider`]. The HTTP
//! implementation lives in [`crate::plaid_client`]; tests substitute their
//! own.

use crate::error::SyncResult;
use async_trait::async_trait;
use plaidvault_storage::DeltaBatch;
use serde::{Deserialize, Serialize};

/// Result of exchanging a one-time public token.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenExchange {
    pub access_token: String,
    pub item_id: String,
}

impl std::fmt::Debug for TokenExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchange")
            .field("access_token", &"[REDACTED]")
            .field("item_id", &self.item_id)
            .finish()
    }
}

/// Paging options forwarded with every delta fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: u32,
    /// Only honoured by the provider on an item's first sync.
    pub days_requested: Option<u32>,
}

/// One page of deltas.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeltaPage {
    pub batch: DeltaBatch,
    pub next_cursor: String,
    pub has_more: bool,
    pub item_status: String,
}

/// An account balance as reported by the provider, before it is cached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: String,
    pub name: Option<String>,
    pub mask: Option<String>,
    pub account_type: Option<String>,
    pub available: Option<f64>,
    pub current: Option<f64>,
    pub iso_currency_code: Option<String>,
}

/// Remote capability the engine drives. Calls may fail; the engine never
/// retries them.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn exchange_token(&self, public_token: &str) -> SyncResult<TokenExchange>;

    /// Fetches the deltas that follow `cursor` (`None` starts from scratch).
    async fn fetch_deltas(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        page: &PageRequest,
    ) -> SyncResult<DeltaPage>;

    async fn fetch_balances(
        &self,
        access_token: &str,
        account_ids: Option<&[String]>,
    ) -> SyncResult<Vec<AccountBalance>>;

    /// Asks the provider to pull fresh data from the institution.
    async fn trigger_refresh(&self, access_token: &str) -> SyncResult<()>;
}
