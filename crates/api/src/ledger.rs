use async_trait::async_trait;
use rust_decimal::Decimal;

use dvm_types::error::LedgerError;
use dvm_types::TxOutput;

/// A finalized block of the carrying ledger, as much of it as the engine
/// needs: its height and its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerBlock {
    pub height: u64,
    /// Hex-encoded block hash.
    pub hash: String,
}

/// A confirmed ledger transaction projected for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    /// Hex-encoded transaction hash.
    pub hash: String,
    /// Sender public keys recovered from the inputs, one per input.
    pub sender_keys: Vec<String>,
    pub outputs: Vec<TxOutput>,
    /// Total fees paid by the transaction.
    pub fees: Decimal,
    /// The free-form message field carrying the VM payload, if any.
    pub message: Option<Vec<u8>>,
    /// Serialized size of the transaction in bytes (`len(hex) / 2`).
    pub size_bytes: u64,
}

impl LedgerTransaction {
    /// The single distinct sender of this transaction, if it has exactly
    /// one. Coinbase-style transactions (no inputs) and transactions mixing
    /// inputs of several keys yield `None` and are skipped by the driver.
    pub fn sole_sender(&self) -> Option<&str> {
        let first = self.sender_keys.first()?;
        if self.sender_keys.iter().all(|k| k == first) {
            Some(first)
        } else {
            None
        }
    }
}

/// The consumed ledger database. Implementations wrap whatever node or
/// database the carrying chain provides; the engine only ever reads.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Height the ledger would assign to the next block, i.e. one past the
    /// highest finalized height.
    async fn next_block_height(&self) -> Result<u64, LedgerError>;

    /// The finalized block at `height`, or `None` if not yet produced.
    async fn block_by_height(&self, height: u64) -> Result<Option<LedgerBlock>, LedgerError>;

    /// Confirmed transactions of the block `block_hash` that pay at least
    /// one output to `address`, in block order.
    async fn transactions_to(
        &self,
        block_hash: &str,
        address: &str,
    ) -> Result<Vec<LedgerTransaction>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(senders: &[&str]) -> LedgerTransaction {
        LedgerTransaction {
            hash: "00".into(),
            sender_keys: senders.iter().map(|s| s.to_string()).collect(),
            outputs: vec![],
            fees: Decimal::ZERO,
            message: None,
            size_bytes: 1,
        }
    }

    #[test]
    fn sole_sender_rules() {
        assert_eq!(tx(&["a"]).sole_sender(), Some("a"));
        assert_eq!(tx(&["a", "a"]).sole_sender(), Some("a"));
        assert_eq!(tx(&["a", "b"]).sole_sender(), None);
        assert_eq!(tx(&[]).sole_sender(), None);
    }
}
