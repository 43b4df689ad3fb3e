//! Runtime configuration for the engine.
//!
//! Loaded from a TOML file by the node binary, with `DVM_`-prefixed
//! environment variables overriding individual fields.

use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn default_timeout_ms() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_smallest() -> Decimal {
    // One millionth of a coin, the carrying ledger's minimum unit.
    Decimal::new(1, 6)
}

fn default_store_path() -> PathBuf {
    PathBuf::from("dvm.redb")
}

fn default_rpc_listen() -> String {
    "127.0.0.1:8642".to_string()
}

/// Credentials for the consumed ledger database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerDbConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DvmConfig {
    /// The receiver address that marks ledger outputs as VM-bound.
    pub dvm_address: String,
    /// Per-call wall-clock budget, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub contract_method_timeout_ms: u64,
    /// The ledger's minimum monetary unit; floor divisor for the fee rate.
    #[serde(default = "default_smallest")]
    pub smallest: Decimal,
    /// Consumed ledger database credentials.
    #[serde(default)]
    pub ledger_db: LedgerDbConfig,
    /// Path of the engine's own persistent store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Listen address for the read-only query surface.
    #[serde(default = "default_rpc_listen")]
    pub rpc_listen: String,
    /// Sleep between polls when the ledger has no new block.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl DvmConfig {
    pub fn with_address(dvm_address: impl Into<String>) -> Self {
        Self {
            dvm_address: dvm_address.into(),
            contract_method_timeout_ms: default_timeout_ms(),
            smallest: default_smallest(),
            ledger_db: LedgerDbConfig::default(),
            store_path: default_store_path(),
            rpc_listen: default_rpc_listen(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn method_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.contract_method_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_defaults() {
        let cfg: DvmConfig =
            toml::from_str("dvm_address = \"DsmArTjpJNuEBuHB2x4f14cDifdduTtu2CR1BMs1P5RcF\"")
                .unwrap();
        assert_eq!(cfg.contract_method_timeout_ms, 10);
        assert_eq!(cfg.smallest, Decimal::new(1, 6));
        assert_eq!(cfg.poll_interval_ms, 3000);
    }
}
