//! Client-facing slave protocol.
//!
//! Writes go to the slave's write port and fetches to its fetch port (see
//! `SlaveEndpoint::fetch_addr`). Each datagram carries one bincode-encoded
//! [`SlaveRequest`]; every request gets exactly one [`SlaveResponse`].

use serde::{Deserialize, Serialize};

use crate::directory::types::Tag;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SlaveRequest {
    Write { tag: Tag, content: Vec<u8> },
    Fetch { tag: Tag },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SlaveResponse {
    /// The write is queued and will land in the next block.
    Accepted { tag: Tag },
    Rejected { tag: Tag, reason: RejectReason },
    /// The full slot, padding included.
    Content { tag: Tag, bytes: Vec<u8> },
    UnknownTag { tag: Tag },
    StorageUnavailable { tag: Tag },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RejectReason {
    /// The client holds no write credit on this slave.
    NoCredit,
    ContentTooLarge { len: usize, max: usize },
    /// The block this write was flushed with could not be stored.
    StorageUnavailable,
    /// The request was sent to the wrong port.
    WrongPort,
}
