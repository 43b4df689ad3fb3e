use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::IdError;

/// 32-byte identifier of a deployed contract.
///
/// Derived at creation from the enclosing block, transaction, and output
/// index; rendered as lowercase hex everywhere a human or a JSON document
/// sees it. Equality and map-key use are by raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractHash([u8; 32]);

impl ContractHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives the hash of a contract created by `output_index` of
    /// `tx_hash` mined in `block_hash`: `sha256(block ∥ tx ∥ index)`.
    pub fn derive(block_hash: &[u8], tx_hash: &[u8], output_index: u8) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(block_hash);
        hasher.update(tx_hash);
        hasher.update([output_index]);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdError::BadLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContractHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContractHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractHash<{}>", self.to_hex())
    }
}

impl FromStr for ContractHash {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| IdError::BadHex(s.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for ContractHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContractHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque identifier of an external account, as recovered from a ledger
/// transaction's input. Deliberately a distinct type from [`ContractHash`];
/// the two are only unified when a contract calls another contract and its
/// own hash is lifted into the callee's `sender` slot.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Lifts a contract hash into an address, for cross-contract calls.
    pub fn from_contract(hash: &ContractHash) -> Self {
        Self(hash.to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address<{}>", self.0)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_order_sensitive() {
        let a = ContractHash::derive(b"block", b"tx", 0);
        let b = ContractHash::derive(b"tx", b"block", 0);
        let c = ContractHash::derive(b"block", b"tx", 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hex_roundtrip() {
        let hash = ContractHash::derive(b"block", b"tx", 3);
        let parsed: ContractHash = hash.to_hex().parse().unwrap();
        assert_eq!(hash, parsed);
        assert!("zz".parse::<ContractHash>().is_err());
        assert!("ab".parse::<ContractHash>().is_err());
    }
}
