//! Process configuration.
//!
//! Built once at startup (usually from the environment), validated, then
//! passed by value into the constructors that need it. Nothing reads the
//! environment after that.

use crate::error::{SyncError, SyncResult};
use plaidvault_crypto::{KdfParams, MIN_SECRET_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BALANCE_TTL_SECS: u64 = 300;
pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const DEFAULT_DAYS_REQUESTED: u32 = 90;
/// Largest history window the provider accepts.
pub const MAX_DAYS_REQUESTED: u32 = 730;
/// Largest page the provider's delta endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Provider deployment to talk to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.plaid.com",
            Environment::Production => "https://production.plaid.com",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" => Ok(Environment::Production),
            other => Err(SyncError::Config(format!(
                "unknown provider environment {other:?} (expected sandbox or production)"
            ))),
        }
    }
}

/// Provider client settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub environment: Environment,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Replaces the environment's base URL (test servers, proxies).
    pub base_url_override: Option<String>,
    /// Transactions per delta page.
    pub page_size: u32,
    /// History window requested on an item's first sync.
    pub days_requested: u32,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Sandbox,
            client_id: String::new(),
            secret: String::new(),
            base_url_override: None,
            page_size: DEFAULT_PAGE_SIZE,
            days_requested: DEFAULT_DAYS_REQUESTED,
            request_timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        self.base_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(SyncError::Config("provider client id is required".into()));
        }
        if self.secret.trim().is_empty() {
            return Err(SyncError::Config("provider secret is required".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(SyncError::Config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if !(1..=MAX_DAYS_REQUESTED).contains(&self.days_requested) {
            return Err(SyncError::Config(format!(
                "days requested must be between 1 and {MAX_DAYS_REQUESTED}, got {}",
                self.days_requested
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::Config("request timeout must be positive".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("environment", &self.environment)
            .field("client_id", &self.client_id)
            .field("secret", &"[REDACTED]")
            .field("base_url_override", &self.base_url_override)
            .field("page_size", &self.page_size)
            .field("days_requested", &self.days_requested)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Top-level configuration for a vault + sync process.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding the salt, index, and per-item state.
    pub storage_root: PathBuf,
    /// Secret the record key is derived from. At least 32 bytes.
    #[serde(skip_serializing)]
    pub encryption_secret: String,
    pub balance_cache_ttl_secs: u64,
    pub kdf: KdfParams,
    pub provider: ProviderConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("data"),
            encryption_secret: String::new(),
            balance_cache_ttl_secs: DEFAULT_BALANCE_TTL_SECS,
            kdf: KdfParams::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("storage_root", &self.storage_root)
            .field("encryption_secret", &"[REDACTED]")
            .field("balance_cache_ttl_secs", &self.balance_cache_ttl_secs)
            .field("kdf", &self.kdf)
            .field("provider", &self.provider)
            .finish()
    }
}

impl VaultConfig {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from `lookup`, which maps a variable name to its
    /// value. Unset optional variables keep their defaults. The result is
    /// validated.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `PLAID_ENV` | `provider.environment` (`sandbox` when unset) |
    /// | `PLAID_CLIENT_ID` | `provider.client_id` (required) |
    /// | `PLAID_SECRET` | `provider.secret` (required) |
    /// | `ENCRYPTION_KEY` | `encryption_secret` (required) |
    /// | `PLAIDVAULT_DATA_DIR` | `storage_root` |
    /// | `BALANCE_CACHE_TTL` | `balance_cache_ttl_secs` |
    /// | `PLAID_DAYS_REQUESTED` | `provider.days_requested` |
    /// | `PLAID_PAGE_SIZE` | `provider.page_size` |
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| SyncError::Config(format!("{key} is required but not set")))
        };

        let mut config = VaultConfig {
            encryption_secret: required("ENCRYPTION_KEY")?,
            ..Default::default()
        };
        config.provider.client_id = required("PLAID_CLIENT_ID")?;
        config.provider.secret = required("PLAID_SECRET")?;

        if let Some(env) = lookup("PLAID_ENV") {
            config.provider.environment = env.parse()?;
        }
        if let Some(dir) = lookup("PLAIDVAULT_DATA_DIR") {
            config.storage_root = PathBuf::from(dir);
        }
        if let Some(ttl) = parse_number(&lookup, "BALANCE_CACHE_TTL")? {
            config.balance_cache_ttl_secs = ttl;
        }
        if let Some(days) = parse_number(&lookup, "PLAID_DAYS_REQUESTED")? {
            config.provider.days_requested = days;
        }
        if let Some(size) = parse_number(&lookup, "PLAID_PAGE_SIZE")? {
            config.provider.page_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the process must not start with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.encryption_secret.len() < MIN_SECRET_LEN {
            return Err(SyncError::Config(format!(
                "encryption secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                self.encryption_secret.len()
            )));
        }
        if self.balance_cache_ttl_secs == 0 {
            return Err(SyncError::Config("balance cache TTL must be positive".into()));
        }
        if self.storage_root.as_os_str().is_empty() {
            return Err(SyncError::Config("storage root is required".into()));
        }
        self.provider.validate()
    }

    pub fn balance_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_cache_ttl_secs)
    }
}

fn parse_number<F, T>(lookup: &F, key: &str) -> SyncResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            SyncError::Config(format!("{key} must be a non-negative integer, got {raw:?}"))
        }),
    }
}
