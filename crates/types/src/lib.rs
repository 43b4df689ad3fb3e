//! Core data structures for the DVM engine.
//!
//! Everything consensus-visible lives here: contract and account
//! identifiers, the self-describing [`Value`] sum type with its binary
//! codec, the error taxonomy, and the runtime configuration. Crates higher
//! in the stack (`dvm-vm`, `dvm-execution`, `dvm-storage`) depend on this
//! one and never on each other's internals.

pub mod codec;
pub mod config;
pub mod error;
mod ids;
mod transaction;
mod value;

pub use ids::{Address, ContractHash};
pub use transaction::{DvmTransaction, TxOutput};
pub use value::{
    canonical_decimal_string, decimal_significant_digits, Value, ValueKind, ValueMap,
    MAX_DECIMAL_DIGITS,
};

/// Variable names a contract may never write. `address` and `transaction`
/// resolve to host-provided projections; the rest are host vocabulary that
/// must not be shadowed by state.
pub const RESERVED_NAMES: [&str; 8] = [
    "address",
    "transaction",
    "block",
    "create",
    "emit",
    "deploy",
    "wrap",
    "reserved",
];

/// Returns true if `name` is reserved and may not be used as a contract
/// state variable or method name.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}
