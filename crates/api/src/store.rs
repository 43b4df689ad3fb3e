use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dvm_types::error::StoreError;
use dvm_types::ContractHash;

/// One deployed contract: immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRow {
    pub contract_hash: ContractHash,
    pub creation_tx_hash: String,
    /// zlib-compressed UTF-8 contract source.
    pub source: Vec<u8>,
}

/// One append-only state row: the full variable map of a contract as it
/// stood after block `block_no`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRow {
    pub contract_hash: ContractHash,
    pub block_no: u64,
    /// JSON object mapping variable names to hex-encoded codec bytes.
    pub state_json: String,
}

/// One committed call, keyed by the ledger output that delivered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub contract_hash: ContractHash,
    pub tx_hash: String,
    pub output_index: u8,
    pub payload_hex: String,
}

/// One event emitted by a committed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub tx_hash: String,
    pub output_index: u8,
    pub contract_hash: ContractHash,
    pub event_name: String,
    /// JSON object mapping field names to hex-encoded codec bytes.
    pub args_json: String,
}

/// Everything one processed block writes, committed atomically together
/// with the cursor advance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockBatch {
    pub block_no: u64,
    pub contracts: Vec<ContractRow>,
    pub states: Vec<StateRow>,
    pub transactions: Vec<TransactionRow>,
    pub events: Vec<EventRow>,
}

impl BlockBatch {
    pub fn new(block_no: u64) -> Self {
        Self {
            block_no,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
            && self.states.is_empty()
            && self.transactions.is_empty()
            && self.events.is_empty()
    }
}

/// The engine's own persistent tables.
///
/// All reads answer from committed data only; `commit_block` is the single
/// write entry point and must apply the whole batch or none of it.
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Height of the last fully processed block, if any.
    async fn cursor(&self) -> Result<Option<u64>, StoreError>;

    /// The contract row for `hash`, if deployed.
    async fn contract(&self, hash: &ContractHash) -> Result<Option<ContractRow>, StoreError>;

    /// Latest persisted state at or before `max_height` for each of
    /// `hashes`. Contracts with no state row are simply absent from the
    /// result.
    async fn latest_states(
        &self,
        hashes: &[ContractHash],
        max_height: u64,
    ) -> Result<HashMap<ContractHash, StateRow>, StoreError>;

    /// All transaction rows recorded for `tx_hash`, in output order.
    async fn transactions(&self, tx_hash: &str) -> Result<Vec<TransactionRow>, StoreError>;

    /// All event rows recorded for `tx_hash`, in emission order.
    async fn events(&self, tx_hash: &str) -> Result<Vec<EventRow>, StoreError>;

    /// Atomically appends the block's rows and advances the cursor.
    async fn commit_block(&self, batch: BlockBatch) -> Result<(), StoreError>;
}
