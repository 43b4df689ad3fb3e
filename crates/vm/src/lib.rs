//! The sandboxed execution environment for DVM contracts.
//!
//! Contract source is a small restricted script (see [`script`]) compiled
//! into a method table and evaluated by a deterministic tree-walking
//! interpreter. The host exposes exactly the whitelisted capabilities:
//! value construction, collection iteration, state access through the
//! current contract, event emission, and restricted handles onto other
//! contracts. Nothing else reaches the sandbox: no I/O, no reflection,
//! no clock.
//!
//! Execution is bounded two ways: every interpreter step consumes fuel,
//! and every fuel window the wall clock is checked against the per-call
//! deadline. Either bound tripping aborts the call with a timeout error,
//! which the block driver turns into a revert.

mod contract;
mod host;
mod interp;
pub mod script;

pub use contract::{
    decode_state, encode_state, Event, LoadedContract, WorkingSet,
};
pub use host::{CallOutcome, ContractHost};
pub use script::{compile, Method, Param, Program};
