//! Control-plane protocol between the master and its slaves.
//!
//! Every datagram carries exactly one bincode-encoded [`ControlMessage`].

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::types::SlaveId;

/// Separator used to join client addresses in a capacity grant.
pub const GRANT_SEPARATOR: char = ';';

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlMessage {
    /// slave -> master. `client_port` is where the slave accepts writes.
    Register { client_port: u16, memory: u64 },

    /// master -> slave, in reply to `Register`.
    Registered { id: SlaveId },

    /// slave -> master, fire-and-forget.
    Heartbeat { id: SlaveId },

    /// master -> slave. Semicolon-joined client addresses, one credit per entry.
    CapacityGrant { clients: String },
}

pub fn join_clients(clients: &[IpAddr]) -> String {
    clients
        .iter()
        .map(|ip| ip.to_string())
        .collect::<Vec<_>>()
        .join(&GRANT_SEPARATOR.to_string())
}

/// Splits a grant list back into addresses. Entries that do not parse are
/// returned separately so the caller can log them.
pub fn split_clients(clients: &str) -> (Vec<IpAddr>, Vec<String>) {
    let mut parsed = Vec::new();
    let mut invalid = Vec::new();

    for entry in clients.split(GRANT_SEPARATOR) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.parse::<IpAddr>() {
            Ok(ip) => parsed.push(ip),
            Err(_) => invalid.push(entry.to_string()),
        }
    }

    (parsed, invalid)
}
