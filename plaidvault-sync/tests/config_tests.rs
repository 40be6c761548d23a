use plaidvault_sync::config::{DEFAULT_BALANCE_TTL_SECS, MAX_DAYS_REQUESTED};
use plaidvault_sync::{Environment, SyncError, VaultConfig};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const KEY: &str = "an-encryption-secret-of-at-least-32-bytes";

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = [
        ("ENCRYPTION_KEY", KEY),
        ("PLAID_CLIENT_ID", "client-123"),
        ("PLAID_SECRET", "plaid-secret"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in pairs {
        map.insert(k.to_string(), v.to_string());
    }
    map
}

fn load(map: &HashMap<String, String>) -> Result<VaultConfig, SyncError> {
    VaultConfig::from_lookup(|key| map.get(key).cloned())
}

fn config_error(result: Result<VaultConfig, SyncError>) -> String {
    match result {
        Err(SyncError::Config(msg)) => msg,
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn minimal_environment_uses_defaults() {
    let config = load(&vars(&[])).unwrap();
    assert_eq!(config.provider.environment, Environment::Sandbox);
    assert_eq!(config.provider.base_url(), "https://sandbox.plaid.com");
    assert_eq!(config.storage_root, PathBuf::from("data"));
    assert_eq!(config.balance_cache_ttl_secs, DEFAULT_BALANCE_TTL_SECS);
    assert_eq!(config.balance_ttl(), Duration::from_secs(300));
    assert_eq!(config.provider.days_requested, 90);
    assert_eq!(config.provider.page_size, 500);
    assert_eq!(config.provider.client_id, "client-123");
}

#[test]
fn optional_variables_override_defaults() {
    let config = load(&vars(&[
        ("PLAID_ENV", "PRODUCTION"),
        ("PLAIDVAULT_DATA_DIR", "/var/lib/plaidvault"),
        ("BALANCE_CACHE_TTL", "60"),
        ("PLAID_DAYS_REQUESTED", "365"),
        ("PLAID_PAGE_SIZE", "100"),
    ]))
    .unwrap();
    assert_eq!(config.provider.environment, Environment::Production);
    assert_eq!(config.provider.base_url(), "https://production.plaid.com");
    assert_eq!(config.storage_root, PathBuf::from("/var/lib/plaidvault"));
    assert_eq!(config.balance_cache_ttl_secs, 60);
    assert_eq!(config.provider.days_requested, 365);
    assert_eq!(config.provider.page_size, 100);
}

#[test]
fn missing_required_variables() {
    for key in ["ENCRYPTION_KEY", "PLAID_CLIENT_ID", "PLAID_SECRET"] {
        let mut map = vars(&[]);
        map.remove(key);
        let msg = config_error(load(&map));
        assert!(msg.contains(key), "{msg}");
    }
}

#[test]
fn blank_required_variable_counts_as_missing() {
    let msg = config_error(load(&vars(&[("PLAID_SECRET", "   ")])));
    assert!(msg.contains("PLAID_SECRET"));
}

#[test]
fn short_encryption_secret_rejected() {
    let msg = config_error(load(&vars(&[("ENCRYPTION_KEY", "too-short")])));
    assert!(msg.contains("at least 32 bytes"), "{msg}");
}

#[test]
fn zero_ttl_rejected() {
    let msg = config_error(load(&vars(&[("BALANCE_CACHE_TTL", "0")])));
    assert!(msg.contains("TTL"));
}

#[test]
fn non_numeric_ttl_rejected() {
    let msg = config_error(load(&vars(&[("BALANCE_CACHE_TTL", "five minutes")])));
    assert!(msg.contains("BALANCE_CACHE_TTL"));
}

#[test]
fn unknown_environment_rejected() {
    let msg = config_error(load(&vars(&[("PLAID_ENV", "development")])));
    assert!(msg.contains("development"));
}

#[test]
fn days_requested_bounds() {
    let too_many = (MAX_DAYS_REQUESTED + 1).to_string();
    config_error(load(&vars(&[("PLAID_DAYS_REQUESTED", too_many.as_str())])));
    config_error(load(&vars(&[("PLAID_DAYS_REQUESTED", "0")])));
    load(&vars(&[("PLAID_DAYS_REQUESTED", "730")])).unwrap();
}

#[test]
fn page_size_bounds() {
    config_error(load(&vars(&[("PLAID_PAGE_SIZE", "501")])));
    config_error(load(&vars(&[("PLAID_PAGE_SIZE", "0")])));
}

#[test]
fn debug_redacts_secrets() {
    let config = load(&vars(&[])).unwrap();
    let debug = format!("{config:?}");
    assert!(!debug.contains(KEY));
    assert!(!debug.contains("plaid-secret"));
    assert!(debug.contains("[REDACTED]"));
    assert!(debug.contains("client-123"));
}

#[test]
fn serialization_skips_secrets() {
    let config = load(&vars(&[])).unwrap();
    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains(KEY));
    assert!(!json.contains("plaid-secret"));

    let back: VaultConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.storage_root, config.storage_root);
    assert_eq!(back.provider.client_id, "client-123");
    assert!(back.encryption_secret.is_empty());
    assert!(back.validate().is_err());
}
