//! Error taxonomy shared by the master and slave components.
//!
//! Lookup misses and conflicts are surfaced to the caller as-is. Storage
//! failures are never retried by the component that raised them. Setup
//! failures (`CouldNotOpen`, `CouldNotRegister`) are fatal to the process.

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::directory::types::Tag;

#[derive(Error, Debug)]
pub enum DfsError {
    #[error("path already exists: {0}")]
    PathConflict(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("no live slave available for placement")]
    NoCapacity,

    #[error("unknown tag: {0}")]
    UnknownTag(Tag),

    #[error("storage unavailable: {context}: {source}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("content of {len} bytes does not fit a {max}-byte slot")]
    ContentTooLarge { len: usize, max: usize },

    #[error("client {0} has no write credit")]
    CreditExhausted(IpAddr),

    #[error("could not register with master at {0}")]
    CouldNotRegister(SocketAddr),

    #[error("could not open socket on {addr}: {source}")]
    CouldNotOpen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl DfsError {
    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        DfsError::StorageUnavailable {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = DfsError> = std::result::Result<T, E>;
