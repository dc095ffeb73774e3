//! Client-facing master protocol.
//!
//! Clients send one bincode-encoded [`MasterRequest`] per datagram and get a
//! single [`MasterResponse`] back on the same socket.

use serde::{Deserialize, Serialize};

use super::types::PathLocation;
use crate::error::DfsError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MasterRequest {
    /// Place a new path and learn where to write it.
    Submit { path: String },
    /// Look up where an existing path lives.
    Resolve { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MasterResponse {
    Located(PathLocation),
    PathConflict { path: String },
    NotFound { path: String },
    NoCapacity,
    /// The master hit an error that is none of the above.
    Failed { reason: String },
}

impl From<crate::error::Result<PathLocation>> for MasterResponse {
    fn from(result: crate::error::Result<PathLocation>) -> Self {
        match result {
            Ok(location) => MasterResponse::Located(location),
            Err(DfsError::PathConflict(path)) => MasterResponse::PathConflict { path },
            Err(DfsError::NotFound(path)) => MasterResponse::NotFound { path },
            Err(DfsError::NoCapacity) => MasterResponse::NoCapacity,
            Err(
                other @ (DfsError::UnknownTag(_)
                | DfsError::StorageUnavailable { .. }
                | DfsError::ContentTooLarge { .. }
                | DfsError::CreditExhausted(_)
                | DfsError::CouldNotRegister(_)
                | DfsError::CouldNotOpen { .. }),
            ) => {
                tracing::error!("Unexpected directory failure: {}", other);
                MasterResponse::Failed {
                    reason: other.to_string(),
                }
            }
        }
    }
}
