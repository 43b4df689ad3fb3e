//! The per-block state machine.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use dvm_api::{
    BlockBatch, ContractRow, ContractStore, EventRow, Ledger, LedgerBlock, StateRow,
    TransactionRow,
};
use dvm_tx::{CallList, CallRecord};
use dvm_types::codec;
use dvm_types::config::DvmConfig;
use dvm_types::error::{CodecError, DriverError, ErrorCode, VmError};
use dvm_types::{Address, ContractHash, DvmTransaction, Value};
use dvm_vm::{encode_state, CallOutcome, ContractHost, Event, WorkingSet};

use crate::{gas, loader};

/// One decoded call or creation, paired with the ledger output that funds
/// it.
struct PendingCall {
    record: CallRecord,
    payload_hex: String,
    tx_hash: String,
    output_index: u8,
    sender: Address,
    fee_rate: Decimal,
    funding: Decimal,
    dvm_tx: Arc<DvmTransaction>,
}

/// What a successful dispatch left behind, before metering decides its
/// fate.
struct Dispatched {
    outcome: CallOutcome,
    target: ContractHash,
    /// Set for creation records: the derived hash and the raw source.
    created: Option<(ContractHash, String)>,
}

/// Drives the execution pipeline over the consumed ledger, one block at a
/// time. A single logical executor: contract code runs synchronously on
/// this task, I/O suspends only between calls.
pub struct BlockDriver<L, S> {
    ledger: Arc<L>,
    store: Arc<S>,
    host: ContractHost,
    config: DvmConfig,
}

impl<L: Ledger, S: ContractStore> BlockDriver<L, S> {
    pub fn new(ledger: Arc<L>, store: Arc<S>, config: DvmConfig) -> Self {
        let host = ContractHost::new(config.method_timeout());
        Self {
            ledger,
            store,
            host,
            config,
        }
    }

    /// Runs the block loop until a fatal error. Per-call failures revert
    /// the call and continue; only persistence and ledger failures abort.
    pub async fn run(&self) -> Result<(), DriverError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if !self.process_next_block().await? {
                tokio::time::sleep(poll).await;
            }
        }
    }

    /// The height the driver would process next: one past the cursor, or
    /// the start of the chain on a fresh store.
    pub async fn next_height(&self) -> Result<u64, DriverError> {
        Ok(match self.store.cursor().await? {
            Some(h) => h + 1,
            None => 0,
        })
    }

    /// Processes the next unprocessed block, if the ledger has one.
    /// Returns whether a block was processed.
    pub async fn process_next_block(&self) -> Result<bool, DriverError> {
        let height = self.next_height().await?;
        let Some(block) = self.ledger.block_by_height(height).await? else {
            return Ok(false);
        };
        self.process_block(&block).await?;
        Ok(true)
    }

    /// Executes every VM-bound call of `block` and commits the block's
    /// rows atomically.
    pub async fn process_block(&self, block: &LedgerBlock) -> Result<(), DriverError> {
        let txs = self
            .ledger
            .transactions_to(&block.hash, &self.config.dvm_address)
            .await?;

        let pending = self.decode_candidates(&txs);
        let targets = pending.iter().filter_map(|call| match &call.record {
            CallRecord::Call(c) => Some(c.contract_hash),
            CallRecord::Creation(_) => None,
        });
        let mut ws = loader::load_working_set(self.store.as_ref(), targets, block.height).await?;

        let mut batch = BlockBatch::new(block.height);
        for call in &pending {
            let snapshot = ws.snapshot();
            let settled = self
                .dispatch_call(&mut ws, call, block)
                .and_then(|dispatched| settle(&snapshot, &ws, call, dispatched, &mut batch));
            match settled {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    ws = snapshot;
                    tracing::warn!(
                        target: "driver",
                        tx = %call.tx_hash,
                        output = call.output_index,
                        code = e.code(),
                        error = %e,
                        "call reverted"
                    );
                }
            }
        }

        // One state row per contract in the working set, in hash order so
        // identical runs write identical batches.
        let mut touched: Vec<ContractHash> = ws.hashes().copied().collect();
        touched.sort();
        for hash in touched {
            let contract = ws
                .get(&hash)
                .ok_or_else(|| VmError::Execution("working set lost a contract".to_string()))?;
            batch.states.push(StateRow {
                contract_hash: hash,
                block_no: block.height,
                state_json: encode_state(&contract.variables).map_err(VmError::from)?,
            });
        }

        let calls = pending.len();
        self.store.commit_block(batch).await?;
        tracing::info!(
            target: "driver",
            height = block.height,
            calls,
            contracts = ws.len(),
            "processed block"
        );
        Ok(())
    }

    /// Steps 1–3 of the pipeline: filter candidate transactions, decode
    /// their payloads, and materialize fee rates. Malformed transactions
    /// are skipped with a logged reason and contribute no calls.
    fn decode_candidates(&self, txs: &[dvm_api::LedgerTransaction]) -> Vec<PendingCall> {
        let mut pending = Vec::new();
        for tx in txs {
            let Some(sender) = tx.sole_sender() else {
                tracing::debug!(
                    target: "driver",
                    tx = %tx.hash,
                    "skipping transaction: not exactly one distinct sender"
                );
                continue;
            };
            let Some(message) = tx.message.as_deref() else {
                tracing::debug!(target: "driver", tx = %tx.hash, "skipping transaction: no payload");
                continue;
            };
            let list = match CallList::from_payload(message) {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!(
                        target: "driver",
                        tx = %tx.hash,
                        code = e.code(),
                        error = %e,
                        "skipping transaction: malformed payload"
                    );
                    continue;
                }
            };

            let vm_outputs: Vec<(u8, Decimal)> = tx
                .outputs
                .iter()
                .enumerate()
                .filter(|(_, out)| out.address == self.config.dvm_address)
                .map(|(index, out)| (index as u8, out.amount))
                .collect();
            if list.records.len() > vm_outputs.len() {
                tracing::warn!(
                    target: "driver",
                    tx = %tx.hash,
                    records = list.records.len(),
                    outputs = vm_outputs.len(),
                    "payload carries more records than funding outputs; extra records dropped"
                );
            }

            let fee_rate = gas::fee_rate(tx.fees, tx.size_bytes, self.config.smallest);
            let dvm_tx = Arc::new(DvmTransaction::new(tx.hash.clone(), tx.outputs.clone()));
            for (record, (output_index, funding)) in list.records.into_iter().zip(vm_outputs) {
                let payload_hex = match record.to_payload() {
                    Ok(payload) => hex::encode(payload),
                    Err(e) => {
                        tracing::warn!(
                            target: "driver",
                            tx = %tx.hash,
                            error = %e,
                            "skipping record: cannot reframe payload"
                        );
                        continue;
                    }
                };
                pending.push(PendingCall {
                    record,
                    payload_hex,
                    tx_hash: tx.hash.clone(),
                    output_index,
                    sender: Address::new(sender),
                    fee_rate,
                    funding,
                    dvm_tx: dvm_tx.clone(),
                });
            }
        }
        pending
    }

    fn dispatch_call(
        &self,
        ws: &mut WorkingSet,
        call: &PendingCall,
        block: &LedgerBlock,
    ) -> Result<Dispatched, DriverError> {
        match &call.record {
            CallRecord::Creation(creation) => {
                let hash = derive_creation_hash(&block.hash, &call.tx_hash, call.output_index);
                tracing::info!(
                    target: "driver",
                    contract = %hash,
                    tx = %call.tx_hash,
                    "deploying contract"
                );
                let outcome = self.host.deploy(
                    ws,
                    hash,
                    &creation.source,
                    &call.sender,
                    creation.args.clone(),
                    &call.dvm_tx,
                )?;
                Ok(Dispatched {
                    outcome,
                    target: hash,
                    created: Some((hash, creation.source.clone())),
                })
            }
            CallRecord::Call(invocation) => {
                let Some(contract) = ws.get(&invocation.contract_hash) else {
                    return Err(DriverError::UnknownContract(invocation.contract_hash));
                };
                if invocation.method == "constructor"
                    || contract.program.exported(&invocation.method).is_none()
                {
                    return Err(DriverError::ForbiddenMethod(invocation.method.clone()));
                }
                let outcome = self.host.call(
                    ws,
                    invocation.contract_hash,
                    &invocation.method,
                    &call.sender,
                    invocation.args.clone(),
                    &call.dvm_tx,
                )?;
                Ok(Dispatched {
                    outcome,
                    target: invocation.contract_hash,
                    created: None,
                })
            }
        }
    }
}

/// Step 5's tail: meter the dispatched call and either append its rows to
/// the block batch or report why it must revert.
fn settle(
    snapshot: &WorkingSet,
    ws: &WorkingSet,
    call: &PendingCall,
    dispatched: Dispatched,
    batch: &mut BlockBatch,
) -> Result<(), DriverError> {
    let size_before = snapshot.encoded_size().map_err(VmError::from)?;
    let size_after = ws.encoded_size().map_err(VmError::from)?;
    let events_len = events_encoded_len(&dispatched.outcome.events).map_err(VmError::from)?;
    let gas = gas::metered_gas(
        size_before,
        size_after,
        events_len,
        dispatched.outcome.instance_count,
    );
    let required = gas::required_fee(gas, call.fee_rate);
    if call.funding < required {
        return Err(DriverError::InsufficientGas {
            required,
            funded: call.funding,
        });
    }

    batch.transactions.push(TransactionRow {
        contract_hash: dispatched.target,
        tx_hash: call.tx_hash.clone(),
        output_index: call.output_index,
        payload_hex: call.payload_hex.clone(),
    });
    for (contract_hash, event) in dispatched.outcome.events {
        let args_json = event.args_json().map_err(VmError::from)?;
        batch.events.push(EventRow {
            tx_hash: call.tx_hash.clone(),
            output_index: call.output_index,
            contract_hash,
            event_name: event.name,
            args_json,
        });
    }
    if let Some((contract_hash, source)) = dispatched.created {
        batch.contracts.push(ContractRow {
            contract_hash,
            creation_tx_hash: call.tx_hash.clone(),
            source: loader::compress_source(&source),
        });
    }
    tracing::debug!(
        target: "driver",
        tx = %call.tx_hash,
        output = call.output_index,
        contract = %dispatched.target,
        gas,
        "call committed"
    );
    Ok(())
}

fn events_encoded_len(events: &[(ContractHash, Event)]) -> Result<usize, CodecError> {
    if events.is_empty() {
        return Ok(0);
    }
    let list = Value::List(events.iter().map(|(_, event)| event.to_value()).collect());
    codec::encoded_len(&list)
}

/// The deployed hash is derived, never supplied:
/// `sha256(block_hash ∥ tx_hash ∥ output_index)`.
fn derive_creation_hash(block_hash: &str, tx_hash: &str, output_index: u8) -> ContractHash {
    let block = hex::decode(block_hash).unwrap_or_else(|_| block_hash.as_bytes().to_vec());
    let tx = hex::decode(tx_hash).unwrap_or_else(|_| tx_hash.as_bytes().to_vec());
    ContractHash::derive(&block, &tx, output_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_hash_depends_on_every_component() {
        let a = derive_creation_hash("aa", "bb", 0);
        assert_ne!(a, derive_creation_hash("ab", "bb", 0));
        assert_ne!(a, derive_creation_hash("aa", "bc", 0));
        assert_ne!(a, derive_creation_hash("aa", "bb", 1));
    }

    #[test]
    fn empty_event_list_costs_nothing() {
        assert_eq!(events_encoded_len(&[]).unwrap(), 0);
    }
}
