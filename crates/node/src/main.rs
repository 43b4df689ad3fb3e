//! The `dvm-node` binary.
//!
//! Wires the persistent store, the block driver, and the read-only query
//! surface together. The consumed ledger is an embedding concern: in
//! production this crate is used as a template with a real ledger adapter
//! behind [`dvm_api::Ledger`]; with `--dev` it runs against an empty
//! in-memory ledger, which is enough to serve queries over previously
//! persisted state and to exercise the full loop locally.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use dvm_api::test_utils::MemoryLedger;
use dvm_execution::BlockDriver;
use dvm_rpc::RpcState;
use dvm_storage::RedbStore;
use dvm_types::config::DvmConfig;

mod settings;

#[derive(Debug, Parser)]
#[command(name = "dvm-node", about = "Smart-contract execution engine daemon")]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = "dvm.toml")]
    config: PathBuf,

    /// Run the block driver against an empty in-memory ledger.
    #[arg(long)]
    dev: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config: DvmConfig = settings::load(&cli.config)?;
    tracing::info!(
        target: "node",
        dvm_address = %config.dvm_address,
        store = %config.store_path.display(),
        rpc = %config.rpc_listen,
        "starting dvm-node"
    );

    let store = Arc::new(
        RedbStore::open(&config.store_path)
            .with_context(|| format!("opening store at {}", config.store_path.display()))?,
    );

    let rpc_state = RpcState::new(store.clone(), &config);
    let rpc_listen = config.rpc_listen.clone();
    let rpc = tokio::spawn(async move { dvm_rpc::serve(&rpc_listen, rpc_state).await });

    if cli.dev {
        let ledger = Arc::new(MemoryLedger::new());
        let driver = BlockDriver::new(ledger, store, config);
        tokio::select! {
            result = driver.run() => result.context("block driver failed")?,
            result = rpc => result.context("rpc task panicked")??,
            _ = tokio::signal::ctrl_c() => tracing::info!(target: "node", "shutting down"),
        }
    } else {
        tokio::select! {
            result = rpc => result.context("rpc task panicked")??,
            _ = tokio::signal::ctrl_c() => tracing::info!(target: "node", "shutting down"),
        }
    }
    Ok(())
}
