//! Slave Storage Module
//!
//! Everything a slave does with client content.
//!
//! ## Core Concepts
//! - **Credit**: A client may write only as many times as the master has granted it capacity (`CapacityLedger`).
//! - **Batching**: Accepted writes are queued and written out as fixed-size block files (`WriteBatcher`).
//! - **Block Files**: A block is a run of equally sized, zero-padded slots. Slot `i` starts at `i * bytes_per_slot`.
//! - **Tag Index**: Tags become readable only after their block is durable on disk (`TagIndex`, `TagReader`).

pub mod batcher;
pub mod block;
pub mod handlers;
pub mod index;
pub mod ledger;
pub mod protocol;
pub mod service;

#[cfg(test)]
mod tests;
