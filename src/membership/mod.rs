//! Slave Membership Module
//!
//! Tracks which slaves are alive. Slaves register with the master over UDP,
//! then keep themselves alive with periodic heartbeats. The master sweeps the
//! registry on a fixed interval and evicts every slave it has not heard from
//! since the previous sweep.
//!
//! ## Core Mechanisms
//! - **Registration**: Identity is the slave's client endpoint. Re-registering is idempotent and returns the same token.
//! - **Liveness Sweep**: A slave survives a sweep only if it registered or heartbeated during the window that just closed.
//! - **Capacity Grants**: After a successful placement the master tells the chosen slave which client may write to it.

pub mod agent;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod types;
