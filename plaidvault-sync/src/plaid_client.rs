//! HTTP client for the Plaid API.
//!
//! Every endpoint is a JSON `POST` carrying `client_id` and `secret` in the
//! body. Non-2xx responses with a Plaid error body become
//! [`SyncError::Provider`]; anything else non-2xx becomes [`SyncError::Api`].

use crate::config::ProviderConfig;
use crate::error::{SyncError, SyncResult};
use crate::provider::{AccountBalance, DeltaPage, PageRequest, Provider, TokenExchange};
use async_trait::async_trait;
use chrono::NaiveDate;
use plaidvault_storage::{DeltaBatch, Transaction};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Plaid implementation of [`Provider`].
pub struct PlaidClient {
    client: Client,
    base_url: String,
    client_id: String,
    secret: String,
}

// ── Wire types ──

#[derive(Serialize)]
struct Authed<'a, T: Serialize> {
    client_id: &'a str,
    secret: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Deserialize)]
struct PlaidErrorBody {
    error_code: String,
    error_message: String,
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    public_token: &'a str,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<SyncOptions>,
}

#[derive(Serialize)]
struct SyncOptions {
    days_requested: u32,
}

#[derive(Deserialize)]
struct SyncResponse {
    #[serde(default)]
    added: Vec<WireTransaction>,
    #[serde(default)]
    modified: Vec<WireTransaction>,
    #[serde(default)]
    removed: Vec<WireRemoved>,
    #[serde(default)]
    next_cursor: String,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    transactions_update_status: Option<String>,
}

#[derive(Deserialize)]
struct WireTransaction {
    transaction_id: String,
    account_id: String,
    amount: f64,
    date: NaiveDate,
    #[serde(default)]
    merchant_name: Option<String>,
    #[serde(default)]
    personal_finance_category: Option<WireCategory>,
    #[serde(default)]
    category: Option<Vec<String>>,
    #[serde(default)]
    pending: bool,
}

#[derive(Deserialize)]
struct WireCategory {
    primary: String,
}

#[derive(Deserialize)]
struct WireRemoved {
    transaction_id: String,
}

#[derive(Serialize)]
struct AccessRequest<'a> {
    access_token: &'a str,
}

#[derive(Serialize)]
struct BalanceRequest<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<BalanceOptions<'a>>,
}

#[derive(Serialize)]
struct BalanceOptions<'a> {
    account_ids: &'a [String],
}

#[derive(Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    accounts: Vec<WireAccount>,
}

#[derive(Deserialize)]
struct WireAccount {
    account_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mask: Option<String>,
    #[serde(default, rename = "type")]
    account_type: Option<String>,
    #[serde(default)]
    balances: WireBalances,
}

#[derive(Default, Deserialize)]
struct WireBalances {
    #[serde(default)]
    available: Option<f64>,
    #[serde(default)]
    current: Option<f64>,
    #[serde(default)]
    iso_currency_code: Option<String>,
}

#[derive(Deserialize)]
struct Ignored {}

impl From<WireTransaction> for Transaction {
    fn from(tx: WireTransaction) -> Self {
        let category = tx
            .personal_finance_category
            .map(|c| c.primary)
            .or_else(|| tx.category.filter(|c| !c.is_empty()).map(|c| c.join(", ")));
        Transaction {
            transaction_id: tx.transaction_id,
            account_id: tx.account_id,
            amount: tx.amount,
            date: tx.date,
            merchant_name: tx.merchant_name,
            category,
            pending: tx.pending,
        }
    }
}

impl From<WireAccount> for AccountBalance {
    fn from(a: WireAccount) -> Self {
        AccountBalance {
            account_id: a.account_id,
            name: a.name,
            mask: a.mask,
            account_type: a.account_type,
            available: a.balances.available,
            current: a.balances.current,
            iso_currency_code: a.balances.iso_currency_code,
        }
    }
}

impl PlaidClient {
    pub fn new(config: &ProviderConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        info!(
            environment = ?config.environment,
            "provider client initialised for {}",
            config.base_url()
        );
        Ok(Self {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            secret: config.secret.clone(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: B) -> SyncResult<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(&Authed {
                client_id: &self.client_id,
                secret: &self.secret,
                body,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<PlaidErrorBody>(&text) {
                Ok(err) => SyncError::Provider {
                    code: err.error_code,
                    message: err.error_message,
                },
                Err(_) => SyncError::Api(format!("{path} returned {status}")),
            });
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Provider for PlaidClient {
    async fn exchange_token(&self, public_token: &str) -> SyncResult<TokenExchange> {
        let resp: ExchangeResponse = self
            .post("/item/public_token/exchange", ExchangeRequest { public_token })
            .await?;
        info!(item_id = %resp.item_id, "public token exchanged");
        Ok(TokenExchange {
            access_token: resp.access_token,
            item_id: resp.item_id,
        })
    }

    async fn fetch_deltas(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        page: &PageRequest,
    ) -> SyncResult<DeltaPage> {
        let request = SyncRequest {
            access_token,
            cursor,
            count: page.page_size,
            options: page.days_requested.map(|days_requested| SyncOptions { days_requested }),
        };
        let resp: SyncResponse = self.post("/transactions/sync", request).await?;

        let batch = DeltaBatch {
            added: resp.added.into_iter().map(Transaction::from).collect(),
            modified: resp.modified.into_iter().map(Transaction::from).collect(),
            removed: resp.removed.into_iter().map(|r| r.transaction_id).collect(),
        };
        debug!(
            added = batch.added.len(),
            modified = batch.modified.len(),
            removed = batch.removed.len(),
            has_more = resp.has_more,
            "delta page fetched"
        );

        Ok(DeltaPage {
            batch,
            next_cursor: resp.next_cursor,
            has_more: resp.has_more,
            item_status: resp
                .transactions_update_status
                .unwrap_or_else(|| "UNKNOWN".to_string()),
        })
    }

    async fn fetch_balances(
        &self,
        access_token: &str,
        account_ids: Option<&[String]>,
    ) -> SyncResult<Vec<AccountBalance>> {
        let request = BalanceRequest {
            access_token,
            options: account_ids
                .filter(|ids| !ids.is_empty())
                .map(|account_ids| BalanceOptions { account_ids }),
        };
        let resp: BalanceResponse = self.post("/accounts/balance/get", request).await?;

        let balances: Vec<AccountBalance> = resp
            .accounts
            .into_iter()
            .filter(|a| account_ids.is_none_or(|ids| ids.is_empty() || ids.contains(&a.account_id)))
            .map(AccountBalance::from)
            .collect();
        debug!(accounts = balances.len(), "balances fetched");
        Ok(balances)
    }

    async fn trigger_refresh(&self, access_token: &str) -> SyncResult<()> {
        let _: Ignored = self
            .post("/transactions/refresh", AccessRequest { access_token })
            .await?;
        info!("transaction refresh requested");
        Ok(())
    }
}
