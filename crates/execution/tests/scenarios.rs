//! End-to-end scenarios for the block driver, on the in-memory ledger and
//! store doubles.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use dvm_api::test_utils::{MemoryLedger, MemoryStore};
use dvm_api::{ContractStore, LedgerTransaction};
use dvm_execution::{loader, BlockDriver};
use dvm_tx::{CallList, CallRecord, ContractCall, ContractCreation};
use dvm_types::config::DvmConfig;
use dvm_types::{Address, ContractHash, DvmTransaction, TxOutput, Value};
use dvm_vm::{decode_state, ContractHost};

const VM_ADDRESS: &str = "DsmArTjpJNuEBuHB2x4f14cDifdduTtu2CR1BMs1P5RcF";
const MINTER: &str = "minter-public-key";

const TOKEN_SOURCE: &str = r#"
    contract Token

    export fn constructor(sender: str, name: str, ticker: str) {
        self.minter = sender;
        self.name = name;
        self.ticker = ticker;
        self.balances = {};
        self.allowances = {};
    }

    export fn mint(sender: str, address: str, amount: decimal) {
        if sender != self.minter {
            fail "unauthorized";
        }
        assert amount > 0;
        self.balances[address] = get(self.balances, address, 0.0) + amount;
        emit("Mint", {"to": address, "amount": amount});
    }

    export fn transfer(sender: str, receiver: str, amount: decimal) {
        assert sender != receiver, "sender and receiver are equal";
        let balance = get(self.balances, sender, 0.0);
        if balance < amount {
            fail "insufficient funds";
        }
        self.balances[sender] = balance - amount;
        self.balances[receiver] = get(self.balances, receiver, 0.0) + amount;
    }

    export fn supply() {
        return sum(values(self.balances));
    }

    export fn store_blob(sender: str, blob: bytes) {
        self.blob = blob;
    }

    export fn reenter() {
        let me = load_contract(self.address);
        me.supply();
    }
"#;

fn config() -> DvmConfig {
    let mut cfg = DvmConfig::with_address(VM_ADDRESS);
    cfg.contract_method_timeout_ms = 1000;
    cfg
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// A ledger transaction carrying `records` through one VM-bound output per
/// record, each funded with `funding` coins.
fn vm_tx(tx_hash: &str, records: Vec<CallRecord>, funding: Decimal) -> LedgerTransaction {
    let message = if records.len() == 1 {
        // Single records may omit the outer list wrapper.
        records[0].to_payload().unwrap()
    } else {
        CallList::new(records.clone()).to_payload().unwrap()
    };
    LedgerTransaction {
        hash: tx_hash.to_string(),
        sender_keys: vec![MINTER.to_string()],
        outputs: records
            .iter()
            .map(|_| TxOutput {
                address: VM_ADDRESS.to_string(),
                amount: funding,
            })
            .collect(),
        fees: dec("0.0001"),
        message: Some(message),
        size_bytes: 100,
    }
}

fn block_hash(n: u8) -> String {
    hex::encode([n; 32])
}

fn tx_hash(n: u8) -> String {
    hex::encode([0xa0 + n; 32])
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    store: Arc<MemoryStore>,
    driver: BlockDriver<MemoryLedger, MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let driver = BlockDriver::new(ledger.clone(), store.clone(), config());
        Self {
            ledger,
            store,
            driver,
        }
    }

    async fn process_all(&self) {
        while self.driver.process_next_block().await.unwrap() {}
    }

    /// Deploys the token contract in its own block and returns its hash.
    async fn deploy_token(&self) -> ContractHash {
        let txh = tx_hash(0);
        let creation = CallRecord::Creation(ContractCreation::new(
            TOKEN_SOURCE,
            vec![Value::str("Coin"), Value::str("CN")],
        ));
        self.ledger
            .push_block(block_hash(0), vec![vm_tx(&txh, vec![creation], dec("100"))]);
        self.process_all().await;
        ContractHash::derive(&[0u8; 32], &[0xa0; 32], 0)
    }

    async fn state_of(&self, hash: ContractHash) -> std::collections::BTreeMap<String, Value> {
        let states = self.store.latest_states(&[hash], u64::MAX).await.unwrap();
        decode_state(&states[&hash].state_json).unwrap()
    }

    async fn balances_of(&self, hash: ContractHash) -> Value {
        self.state_of(hash).await.remove("balances").unwrap()
    }

    /// Read-only query: rebuild a disposable working set and invoke.
    async fn query(&self, hash: ContractHash, method: &str, args: Vec<Value>) -> Option<Value> {
        let mut ws = loader::load_working_set(self.store.as_ref(), [hash], u64::MAX)
            .await
            .unwrap();
        let host = ContractHost::new(Duration::from_millis(1000));
        let tx = DvmTransaction::new("00", vec![]);
        host.call(&mut ws, hash, method, &Address::new("query"), args, &tx)
            .unwrap()
            .return_value
    }
}

fn balance(balances: &Value, addr: &str) -> Option<Value> {
    balances
        .as_map()
        .unwrap()
        .get(&Value::str(addr))
        .cloned()
}

#[tokio::test]
async fn deploy_creates_contract_and_initial_state() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    let row = h.store.contract(&token).await.unwrap().unwrap();
    assert_eq!(row.creation_tx_hash, tx_hash(0));
    assert_eq!(
        loader::decompress_source(&row.source).unwrap(),
        TOKEN_SOURCE
    );

    let state = h.state_of(token).await;
    assert_eq!(state["minter"], Value::str(MINTER));
    assert_eq!(state["name"], Value::str("Coin"));
    assert_eq!(state["ticker"], Value::str("CN"));
    assert_eq!(state["balances"], Value::empty_map());
    assert_eq!(state["allowances"], Value::empty_map());

    assert_eq!(h.store.cursor().await.unwrap(), Some(0));
}

#[tokio::test]
async fn mint_updates_balances_and_supply() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    let mint = CallRecord::Call(ContractCall::new(
        token,
        "mint",
        vec![Value::str("X"), Value::Decimal(dec("100"))],
    ));
    h.ledger
        .push_block(block_hash(1), vec![vm_tx(&tx_hash(1), vec![mint], dec("100"))]);
    h.process_all().await;

    let balances = h.balances_of(token).await;
    assert_eq!(balance(&balances, "X"), Some(Value::Decimal(dec("100"))));

    let supply = h.query(token, "supply", vec![]).await;
    assert_eq!(supply, Some(Value::Decimal(dec("100"))));

    // The committed call left a transaction row and its event.
    let rows = h.store.transactions(&tx_hash(1)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].contract_hash, token);
    let events = h.store.events(&tx_hash(1)).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name, "Mint");
}

#[tokio::test]
async fn unauthorized_mint_reverts_without_rows() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    let mint = CallRecord::Call(ContractCall::new(
        token,
        "mint",
        vec![Value::str("X"), Value::Decimal(dec("100"))],
    ));
    let mut tx = vm_tx(&tx_hash(2), vec![mint], dec("100"));
    tx.sender_keys = vec!["someone-else".to_string()];
    h.ledger.push_block(block_hash(2), vec![tx]);
    h.process_all().await;

    assert_eq!(h.balances_of(token).await, Value::empty_map());
    assert!(h.store.transactions(&tx_hash(2)).await.unwrap().is_empty());
    assert!(h.store.events(&tx_hash(2)).await.unwrap().is_empty());
    // The block itself still advanced the cursor.
    assert_eq!(h.store.cursor().await.unwrap(), Some(1));
}

#[tokio::test]
async fn transfer_with_insufficient_funds_reverts() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    let mint = CallRecord::Call(ContractCall::new(
        token,
        "mint",
        vec![Value::str("X"), Value::Decimal(dec("30"))],
    ));
    h.ledger
        .push_block(block_hash(1), vec![vm_tx(&tx_hash(1), vec![mint], dec("100"))]);

    let transfer = CallRecord::Call(ContractCall::new(
        token,
        "transfer",
        vec![Value::str("Y"), Value::Decimal(dec("50"))],
    ));
    let mut tx = vm_tx(&tx_hash(3), vec![transfer], dec("100"));
    tx.sender_keys = vec!["X".to_string()];
    h.ledger.push_block(block_hash(3), vec![tx]);
    h.process_all().await;

    let balances = h.balances_of(token).await;
    assert_eq!(balance(&balances, "X"), Some(Value::Decimal(dec("30"))));
    assert_eq!(balance(&balances, "Y"), None);
    assert!(h.store.transactions(&tx_hash(3)).await.unwrap().is_empty());
}

#[tokio::test]
async fn self_reentry_reverts() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    let mint = CallRecord::Call(ContractCall::new(
        token,
        "mint",
        vec![Value::str("X"), Value::Decimal(dec("5"))],
    ));
    h.ledger
        .push_block(block_hash(1), vec![vm_tx(&tx_hash(1), vec![mint], dec("100"))]);

    let reenter = CallRecord::Call(ContractCall::new(token, "reenter", vec![]));
    h.ledger
        .push_block(block_hash(4), vec![vm_tx(&tx_hash(4), vec![reenter], dec("100"))]);
    h.process_all().await;

    // State unchanged by the reverted reentry.
    let balances = h.balances_of(token).await;
    assert_eq!(balance(&balances, "X"), Some(Value::Decimal(dec("5"))));
    assert!(h.store.transactions(&tx_hash(4)).await.unwrap().is_empty());
}

#[tokio::test]
async fn insufficient_gas_reverts() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    // Grows state by 10 KiB; the funding output covers far less at the
    // transaction's fee rate of 0.0001 / 100 = 1e-6 per byte.
    let blob = CallRecord::Call(ContractCall::new(
        token,
        "store_blob",
        vec![Value::Bytes(vec![0x5a; 10 * 1024])],
    ));
    let required_ballpark = dec("0.01"); // ~10 KiB * 1e-6, plus instance gas
    let funding = dec("0.001");
    assert!(funding < required_ballpark);
    h.ledger
        .push_block(block_hash(5), vec![vm_tx(&tx_hash(5), vec![blob], funding)]);
    h.process_all().await;

    assert!(!h.state_of(token).await.contains_key("blob"));
    assert!(h.store.transactions(&tx_hash(5)).await.unwrap().is_empty());

    // The same call with ample funding commits.
    let blob = CallRecord::Call(ContractCall::new(
        token,
        "store_blob",
        vec![Value::Bytes(vec![0x5a; 10 * 1024])],
    ));
    h.ledger
        .push_block(block_hash(6), vec![vm_tx(&tx_hash(6), vec![blob], dec("100"))]);
    h.process_all().await;
    assert!(h.state_of(token).await.contains_key("blob"));
}

#[tokio::test]
async fn calls_in_one_transaction_run_in_output_order() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    // Mint then transfer inside one transaction: the transfer sees the
    // minted balance.
    let records = vec![
        CallRecord::Call(ContractCall::new(
            token,
            "mint",
            vec![Value::str(MINTER), Value::Decimal(dec("10"))],
        )),
        CallRecord::Call(ContractCall::new(
            token,
            "transfer",
            vec![Value::str("Y"), Value::Decimal(dec("4"))],
        )),
    ];
    h.ledger
        .push_block(block_hash(7), vec![vm_tx(&tx_hash(7), records, dec("100"))]);
    h.process_all().await;

    let balances = h.balances_of(token).await;
    assert_eq!(balance(&balances, MINTER), Some(Value::Decimal(dec("6"))));
    assert_eq!(balance(&balances, "Y"), Some(Value::Decimal(dec("4"))));
    assert_eq!(h.store.transactions(&tx_hash(7)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_contract_and_constructor_calls_are_skipped() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    let ghost = ContractHash::derive(b"no", b"where", 9);
    let records = vec![
        CallRecord::Call(ContractCall::new(ghost, "mint", vec![])),
        CallRecord::Call(ContractCall::new(token, "constructor", vec![])),
        CallRecord::Call(ContractCall::new(
            token,
            "mint",
            vec![Value::str("X"), Value::Decimal(dec("1"))],
        )),
    ];
    h.ledger
        .push_block(block_hash(8), vec![vm_tx(&tx_hash(8), records, dec("100"))]);
    h.process_all().await;

    // The two bad calls were skipped; the good one still landed.
    let balances = h.balances_of(token).await;
    assert_eq!(balance(&balances, "X"), Some(Value::Decimal(dec("1"))));
    assert_eq!(h.store.transactions(&tx_hash(8)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_payload_skips_the_whole_transaction() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    let mut tx = vm_tx(
        &tx_hash(9),
        vec![CallRecord::Call(ContractCall::new(
            token,
            "mint",
            vec![Value::str("X"), Value::Decimal(dec("1"))],
        ))],
        dec("100"),
    );
    tx.message = Some(b"dvm9\0garbage".to_vec());
    h.ledger.push_block(block_hash(9), vec![tx]);
    h.process_all().await;

    assert_eq!(h.balances_of(token).await, Value::empty_map());
    assert!(h.store.transactions(&tx_hash(9)).await.unwrap().is_empty());
    assert_eq!(h.store.cursor().await.unwrap(), Some(1));
}

#[tokio::test]
async fn multi_sender_transactions_are_rejected() {
    let h = Harness::new();
    let token = h.deploy_token().await;

    let mut tx = vm_tx(
        &tx_hash(10),
        vec![CallRecord::Call(ContractCall::new(
            token,
            "mint",
            vec![Value::str("X"), Value::Decimal(dec("1"))],
        ))],
        dec("100"),
    );
    tx.sender_keys = vec![MINTER.to_string(), "accomplice".to_string()];
    h.ledger.push_block(block_hash(10), vec![tx]);
    h.process_all().await;

    assert_eq!(h.balances_of(token).await, Value::empty_map());
}

#[tokio::test]
async fn full_pipeline_persists_through_redb() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(dvm_storage::RedbStore::open(dir.path().join("dvm.redb")).unwrap());
    let driver = BlockDriver::new(ledger.clone(), store.clone(), config());

    let creation = CallRecord::Creation(ContractCreation::new(
        TOKEN_SOURCE,
        vec![Value::str("Coin"), Value::str("CN")],
    ));
    ledger.push_block(block_hash(0), vec![vm_tx(&tx_hash(0), vec![creation], dec("100"))]);
    let token = ContractHash::derive(&[0u8; 32], &[0xa0; 32], 0);

    let mint = CallRecord::Call(ContractCall::new(
        token,
        "mint",
        vec![Value::str("X"), Value::Decimal(dec("100"))],
    ));
    ledger.push_block(block_hash(1), vec![vm_tx(&tx_hash(1), vec![mint], dec("100"))]);

    while driver.process_next_block().await.unwrap() {}

    assert_eq!(store.cursor().await.unwrap(), Some(1));
    assert!(store.contract(&token).await.unwrap().is_some());
    let states = store.latest_states(&[token], u64::MAX).await.unwrap();
    let state = decode_state(&states[&token].state_json).unwrap();
    let balances = &state["balances"];
    assert_eq!(
        balances.as_map().unwrap().get(&Value::str("X")),
        Some(&Value::Decimal(dec("100")))
    );
    assert_eq!(store.events(&tx_hash(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn identical_inputs_produce_identical_state_rows() {
    async fn run() -> Vec<(u64, String)> {
        let h = Harness::new();
        let token = h.deploy_token().await;
        let mint = CallRecord::Call(ContractCall::new(
            token,
            "mint",
            vec![Value::str("X"), Value::Decimal(dec("7"))],
        ));
        h.ledger
            .push_block(block_hash(1), vec![vm_tx(&tx_hash(1), vec![mint], dec("100"))]);
        h.process_all().await;
        h.store
            .state_history(&token)
            .into_iter()
            .map(|row| (row.block_no, row.state_json))
            .collect()
    }

    let first = run().await;
    let second = run().await;
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
