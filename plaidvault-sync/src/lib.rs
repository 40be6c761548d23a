//! Plaid sync engine for plaidvault.
//!
//! Provides:
//! - A provider capability ([`Provider`]) and its Plaid HTTP implementation
//! - Cursor-based per-item delta sync with per-item locking
//! - A TTL-bounded balance cache over the sync-state store
//! - Environment-driven configuration and a service facade tying it together

pub mod balance_cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod logging;
pub mod plaid_client;
pub mod provider;
pub mod service;

pub use balance_cache::{BalanceCache, CachedBalances};
pub use config::{Environment, ProviderConfig, VaultConfig};
pub use engine::{SyncEngine, SyncOptions, SyncPhase, SyncReport};
pub use error::{SyncError, SyncResult};
pub use plaid_client::PlaidClient;
pub use provider::{AccountBalance, DeltaPage, PageRequest, Provider, TokenExchange};
pub use service::{BalanceReport, LinkedItem, VaultService};
