//! In-memory implementations of the engine's boundaries, for tests and
//! the node's dev mode.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use dvm_types::error::{LedgerError, StoreError};
use dvm_types::ContractHash;

use crate::ledger::{Ledger, LedgerBlock, LedgerTransaction};
use crate::store::{BlockBatch, ContractRow, ContractStore, EventRow, StateRow, TransactionRow};

/// A fixed sequence of blocks served from memory.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Vec<(LedgerBlock, Vec<LedgerTransaction>)>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a block at the next height and returns its hash.
    pub fn push_block(&self, hash: impl Into<String>, txs: Vec<LedgerTransaction>) -> LedgerBlock {
        let mut blocks = self.inner.lock().expect("ledger lock");
        let block = LedgerBlock {
            height: blocks.len() as u64,
            hash: hash.into(),
        };
        blocks.push((block.clone(), txs));
        block
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn next_block_height(&self) -> Result<u64, LedgerError> {
        Ok(self.inner.lock().expect("ledger lock").len() as u64)
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<LedgerBlock>, LedgerError> {
        let blocks = self.inner.lock().expect("ledger lock");
        Ok(blocks.get(height as usize).map(|(b, _)| b.clone()))
    }

    async fn transactions_to(
        &self,
        block_hash: &str,
        address: &str,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let blocks = self.inner.lock().expect("ledger lock");
        let (_, txs) = blocks
            .iter()
            .find(|(b, _)| b.hash == block_hash)
            .ok_or_else(|| LedgerError::Backend(format!("unknown block {block_hash}")))?;
        Ok(txs
            .iter()
            .filter(|tx| tx.outputs.iter().any(|out| out.address == address))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct MemoryStoreInner {
    contracts: HashMap<ContractHash, ContractRow>,
    // Keyed for ordered latest-at-height lookups per contract.
    states: Vec<StateRow>,
    transactions: Vec<TransactionRow>,
    events: Vec<EventRow>,
    cursor: Option<u64>,
}

/// A [`ContractStore`] held entirely in memory. Commits are atomic by
/// construction: the whole batch lands under one lock acquisition.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: all state rows persisted for `hash`, in commit order.
    pub fn state_history(&self, hash: &ContractHash) -> Vec<StateRow> {
        let inner = self.inner.lock().expect("store lock");
        inner
            .states
            .iter()
            .filter(|row| row.contract_hash == *hash)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContractStore for MemoryStore {
    async fn cursor(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.inner.lock().expect("store lock").cursor)
    }

    async fn contract(&self, hash: &ContractHash) -> Result<Option<ContractRow>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner.contracts.get(hash).cloned())
    }

    async fn latest_states(
        &self,
        hashes: &[ContractHash],
        max_height: u64,
    ) -> Result<HashMap<ContractHash, StateRow>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        let mut out = HashMap::new();
        for hash in hashes {
            let latest = inner
                .states
                .iter()
                .filter(|row| row.contract_hash == *hash && row.block_no <= max_height)
                .max_by_key(|row| row.block_no);
            if let Some(row) = latest {
                out.insert(*hash, row.clone());
            }
        }
        Ok(out)
    }

    async fn transactions(&self, tx_hash: &str) -> Result<Vec<TransactionRow>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .transactions
            .iter()
            .filter(|row| row.tx_hash == tx_hash)
            .cloned()
            .collect())
    }

    async fn events(&self, tx_hash: &str) -> Result<Vec<EventRow>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .events
            .iter()
            .filter(|row| row.tx_hash == tx_hash)
            .cloned()
            .collect())
    }

    async fn commit_block(&self, batch: BlockBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        for row in batch.contracts {
            inner.contracts.insert(row.contract_hash, row);
        }
        inner.states.extend(batch.states);
        inner.transactions.extend(batch.transactions);
        inner.events.extend(batch.events);
        inner.cursor = Some(batch.block_no);
        Ok(())
    }
}
