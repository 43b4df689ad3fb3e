//! Single-file persistent store for the engine, on redb.
//!
//! Five tables, one write transaction per processed block:
//!
//! - `contracts`: contract hash → (creation tx, compressed source)
//! - `contract_state`: contract hash ∥ height → state JSON, append-only
//! - `transactions`: tx hash ∥ output index → committed call row
//! - `events`: tx hash ∥ output index ∥ sequence → emitted event row
//! - `vm_cursor`: the last fully processed block height
//!
//! Keys that embed a transaction hash are length-prefixed so one hash can
//! never be a prefix of another; state keys order heights big-endian so
//! "latest at or before h" is a bounded reverse range scan.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use dvm_api::{BlockBatch, ContractRow, ContractStore, EventRow, StateRow, TransactionRow};
use dvm_types::error::StoreError;
use dvm_types::ContractHash;

const CONTRACTS: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("contracts");
const CONTRACT_STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("contract_state");
const TRANSACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("transactions");
const EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events");
const VM_CURSOR: TableDefinition<&[u8; 4], u64> = TableDefinition::new("vm_cursor");

fn key_cursor() -> [u8; 4] {
    *b"CURS"
}

fn be64(h: u64) -> [u8; 8] {
    h.to_be_bytes()
}

fn k_state(hash: &ContractHash, height: u64) -> Vec<u8> {
    [hash.as_bytes().as_slice(), &be64(height)].concat()
}

fn k_tx_prefix(tx_hash: &str) -> Vec<u8> {
    let bytes = tx_hash.as_bytes();
    let mut key = Vec::with_capacity(bytes.len() + 1);
    key.push(bytes.len() as u8);
    key.extend_from_slice(bytes);
    key
}

fn k_transaction(tx_hash: &str, output_index: u8) -> Vec<u8> {
    let mut key = k_tx_prefix(tx_hash);
    key.push(output_index);
    key
}

fn k_event(tx_hash: &str, output_index: u8, seq: u32) -> Vec<u8> {
    let mut key = k_transaction(tx_hash, output_index);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode_row<T: Serialize>(row: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(row).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_row<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// The redb-backed [`ContractStore`].
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Opens (or creates) the store at `path`, ensuring all tables exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(backend)?;
        {
            let w = db.begin_write().map_err(backend)?;
            {
                w.open_table(CONTRACTS).map_err(backend)?;
                w.open_table(CONTRACT_STATE).map_err(backend)?;
                w.open_table(TRANSACTIONS).map_err(backend)?;
                w.open_table(EVENTS).map_err(backend)?;
                w.open_table(VM_CURSOR).map_err(backend)?;
            }
            w.commit().map_err(backend)?;
        }
        Ok(Self { db })
    }

    fn scan_prefix<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        prefix: &[u8],
    ) -> Result<Vec<T>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let table = r.open_table(table).map_err(backend)?;
        let mut upper = prefix.to_vec();
        upper.extend_from_slice(&[0xff; 5]);
        let mut rows = Vec::new();
        for entry in table
            .range(prefix..=upper.as_slice())
            .map_err(backend)?
        {
            let (_, value) = entry.map_err(backend)?;
            rows.push(decode_row(value.value())?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl ContractStore for RedbStore {
    async fn cursor(&self) -> Result<Option<u64>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let table = r.open_table(VM_CURSOR).map_err(backend)?;
        let value = table.get(&key_cursor()).map_err(backend)?;
        Ok(value.map(|v| v.value()))
    }

    async fn contract(&self, hash: &ContractHash) -> Result<Option<ContractRow>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let table = r.open_table(CONTRACTS).map_err(backend)?;
        let result = match table.get(hash.as_bytes()).map_err(backend)? {
            Some(value) => Some(decode_row(value.value())?),
            None => None,
        };
        Ok(result)
    }

    async fn latest_states(
        &self,
        hashes: &[ContractHash],
        max_height: u64,
    ) -> Result<HashMap<ContractHash, StateRow>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let table = r.open_table(CONTRACT_STATE).map_err(backend)?;
        let mut out = HashMap::new();
        for hash in hashes {
            let lower = k_state(hash, 0);
            let upper = k_state(hash, max_height);
            let mut range = table
                .range(lower.as_slice()..=upper.as_slice())
                .map_err(backend)?;
            if let Some(entry) = range.next_back() {
                let (_, value) = entry.map_err(backend)?;
                out.insert(*hash, decode_row(value.value())?);
            }
        }
        Ok(out)
    }

    async fn transactions(&self, tx_hash: &str) -> Result<Vec<TransactionRow>, StoreError> {
        self.scan_prefix(TRANSACTIONS, &k_tx_prefix(tx_hash))
    }

    async fn events(&self, tx_hash: &str) -> Result<Vec<EventRow>, StoreError> {
        self.scan_prefix(EVENTS, &k_tx_prefix(tx_hash))
    }

    async fn commit_block(&self, batch: BlockBatch) -> Result<(), StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut contracts = w.open_table(CONTRACTS).map_err(backend)?;
            for row in &batch.contracts {
                contracts
                    .insert(row.contract_hash.as_bytes(), encode_row(row)?.as_slice())
                    .map_err(backend)?;
            }

            let mut states = w.open_table(CONTRACT_STATE).map_err(backend)?;
            for row in &batch.states {
                states
                    .insert(
                        k_state(&row.contract_hash, row.block_no).as_slice(),
                        encode_row(row)?.as_slice(),
                    )
                    .map_err(backend)?;
            }

            let mut transactions = w.open_table(TRANSACTIONS).map_err(backend)?;
            for row in &batch.transactions {
                transactions
                    .insert(
                        k_transaction(&row.tx_hash, row.output_index).as_slice(),
                        encode_row(row)?.as_slice(),
                    )
                    .map_err(backend)?;
            }

            let mut events = w.open_table(EVENTS).map_err(backend)?;
            for (seq, row) in batch.events.iter().enumerate() {
                events
                    .insert(
                        k_event(&row.tx_hash, row.output_index, seq as u32).as_slice(),
                        encode_row(row)?.as_slice(),
                    )
                    .map_err(backend)?;
            }

            let mut cursor = w.open_table(VM_CURSOR).map_err(backend)?;
            cursor
                .insert(&key_cursor(), batch.block_no)
                .map_err(backend)?;
        }
        w.commit().map_err(backend)?;
        tracing::debug!(
            target: "storage",
            block_no = batch.block_no,
            contracts = batch.contracts.len(),
            states = batch.states.len(),
            transactions = batch.transactions.len(),
            events = batch.events.len(),
            "committed block batch"
        );
        Ok(())
    }
}
