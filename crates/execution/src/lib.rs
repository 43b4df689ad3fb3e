//! The block driver: the per-block execution pipeline of the DVM engine.
//!
//! For every finalized block the driver filters transactions addressed to
//! the VM receiver, decodes their payloads into creation and call records,
//! rebuilds the working set of touched contracts from persisted state,
//! dispatches each call under the sandbox's budget, meters gas from the
//! observed state delta and instance depth, reverts or commits each call
//! atomically, and persists the block's rows in one store transaction
//! before advancing the cursor.

pub mod driver;
pub mod gas;
pub mod loader;

pub use driver::BlockDriver;
