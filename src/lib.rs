//! Distributed File Store Library
//!
//! A master/slave store for write-once files. The master decides where each
//! path lives; slaves hold the bytes in block files on local disk. Clients
//! talk to both over UDP.
//!
//! ## Architecture Modules
//! - **`membership`**: Slave registration, heartbeats and the periodic liveness sweep on the master.
//! - **`directory`**: The path to location map and the client-facing master service.
//! - **`storage`**: Per-client write credit, the write batcher, block files and the tag index on a slave.
//! - **`node`**: Wires the above into runnable master and slave servers.
//! - **`client`**: A small UDP client used by the CLI and the end-to-end tests.

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod membership;
pub mod node;
pub mod storage;
