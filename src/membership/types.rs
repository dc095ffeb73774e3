use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Offset from a slave's write port to its fetch port.
pub const FETCH_PORT_OFFSET: u16 = 1;

/// Network identity of a slave: the address clients write content to.
///
/// Created on registration and never mutated. The fetch socket lives on the
/// next port up, see [`SlaveEndpoint::fetch_addr`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlaveEndpoint(pub SocketAddr);

impl SlaveEndpoint {
    pub fn write_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn fetch_addr(&self) -> SocketAddr {
        SocketAddr::new(self.0.ip(), self.0.port().wrapping_add(FETCH_PORT_OFFSET))
    }
}

impl fmt::Display for SlaveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity token handed to a slave on registration and echoed back
/// in every heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlaveId(pub String);

impl SlaveId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SlaveId {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the master knows about one registered slave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveRecord {
    pub id: SlaveId,
    pub endpoint: SlaveEndpoint,
    /// Source address of the registration; capacity grants are sent here.
    pub control_addr: SocketAddr,
    /// Advertised memory in bytes.
    pub memory: u64,
}

/// One credit owed to `client` on `slave`, queued by the master after a
/// successful placement and delivered by the grant emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingGrant {
    pub slave: SlaveEndpoint,
    pub client: std::net::IpAddr,
}
