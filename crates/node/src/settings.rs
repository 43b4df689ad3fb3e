//! Configuration loading: a TOML file with `DVM_`-prefixed environment
//! overrides, so deployments can keep credentials out of the file.

use std::path::Path;

use anyhow::Context;
use rust_decimal::Decimal;

use dvm_types::config::DvmConfig;

/// Loads the configuration file (or defaults when it is absent) and
/// applies environment overrides.
pub fn load(path: &Path) -> anyhow::Result<DvmConfig> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        tracing::warn!(
            target: "node",
            config = %path.display(),
            "config file not found; using defaults"
        );
        DvmConfig::with_address(default_dvm_address())
    };
    apply_env(&mut config)?;
    Ok(config)
}

fn default_dvm_address() -> String {
    "DsmArTjpJNuEBuHB2x4f14cDifdduTtu2CR1BMs1P5RcF".to_string()
}

fn apply_env(config: &mut DvmConfig) -> anyhow::Result<()> {
    if let Ok(address) = std::env::var("DVM_ADDRESS") {
        config.dvm_address = address;
    }
    if let Ok(timeout) = std::env::var("DVM_CONTRACT_METHOD_TIMEOUT") {
        config.contract_method_timeout_ms = timeout
            .parse()
            .context("DVM_CONTRACT_METHOD_TIMEOUT must be milliseconds")?;
    }
    if let Ok(smallest) = std::env::var("DVM_SMALLEST") {
        config.smallest = smallest
            .parse::<Decimal>()
            .context("DVM_SMALLEST must be a decimal")?;
    }
    if let Ok(path) = std::env::var("DVM_STORE_PATH") {
        config.store_path = path.into();
    }
    if let Ok(listen) = std::env::var("DVM_RPC_LISTEN") {
        config.rpc_listen = listen;
    }
    if let Ok(user) = std::env::var("DVM_DATABASE_USER") {
        config.ledger_db.user = user;
    }
    if let Ok(password) = std::env::var("DVM_DATABASE_PASSWORD") {
        config.ledger_db.password = password;
    }
    if let Ok(database) = std::env::var("DVM_DATABASE_NAME") {
        config.ledger_db.database = database;
    }
    Ok(())
}
