use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueMap};

/// One output of the carrying ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: Decimal,
}

/// The host-visible projection of the ledger transaction a call arrived in.
///
/// Contract code sees this as the reserved `transaction` name; it is the
/// only window the sandbox gets onto the carrying chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvmTransaction {
    pub tx_hash: String,
    pub outputs: Vec<TxOutput>,
}

impl DvmTransaction {
    pub fn new(tx_hash: impl Into<String>, outputs: Vec<TxOutput>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            outputs,
        }
    }

    /// Projects the transaction into the value space so contract code can
    /// index into it like any other mapping.
    pub fn to_value(&self) -> Value {
        let mut map = ValueMap::new();
        map.insert(Value::str("hash"), Value::str(self.tx_hash.clone()));
        map.insert(
            Value::str("outputs"),
            Value::List(
                self.outputs
                    .iter()
                    .map(|out| {
                        Value::Tuple(vec![
                            Value::str(out.address.clone()),
                            Value::Decimal(out.amount),
                        ])
                    })
                    .collect(),
            ),
        );
        Value::Map(map)
    }
}
