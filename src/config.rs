//! Runtime configuration for both node roles.
//!
//! Values come from `main`'s `--flag value` arguments with `DFS_*` environment
//! fallbacks; anything left unset keeps the defaults below.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Number of queued writes that triggers a flush into one block file.
pub const DEFAULT_SLOTS_PER_BLOCK: usize = 4096;
/// Fixed byte size of every slot in a block file. A full slot must still fit
/// in one fetch response datagram.
pub const DEFAULT_BYTES_PER_SLOT: usize = 60 * 1024;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65507;
/// Room left in a fetch response for the encoded tag and enum framing.
pub const RESPONSE_OVERHEAD: usize = 256;

pub const DEFAULT_STORAGE_ROOT: &str = "blocks";

#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Socket clients send Submit/Resolve requests to.
    pub client_addr: SocketAddr,
    /// Socket slaves register and heartbeat on.
    pub slave_addr: SocketAddr,
    pub http_addr: Option<SocketAddr>,
    pub sweep_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            client_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7000),
            slave_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7001),
            http_addr: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlaveConfig {
    /// The master's slave-facing socket.
    pub master_addr: SocketAddr,
    /// Local socket used for registration, heartbeats and capacity grants.
    pub control_addr: SocketAddr,
    /// Clients write to this port; fetches go to `client_port + 1`.
    pub client_port: u16,
    /// Address the write and fetch sockets bind to.
    pub bind_ip: IpAddr,
    /// Advertised memory in bytes, reported to the master on registration.
    pub memory: u64,
    pub storage_root: PathBuf,
    pub slots_per_block: usize,
    pub bytes_per_slot: usize,
    pub heartbeat_interval: Duration,
    pub register_timeout: Duration,
    pub register_attempts: usize,
    pub http_addr: Option<SocketAddr>,
    pub stats_interval: Duration,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            master_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7001),
            control_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7100),
            client_port: 7101,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            memory: 1 << 30,
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            slots_per_block: DEFAULT_SLOTS_PER_BLOCK,
            bytes_per_slot: DEFAULT_BYTES_PER_SLOT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            register_timeout: Duration::from_secs(2),
            register_attempts: 3,
            http_addr: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

/// Heartbeats must arrive strictly more often than the sweep runs, otherwise
/// a healthy slave can be evicted between two heartbeats.
pub fn validate_liveness(heartbeat: Duration, sweep: Duration) -> anyhow::Result<()> {
    if heartbeat >= sweep {
        anyhow::bail!(
            "heartbeat interval {:?} must be smaller than sweep interval {:?}",
            heartbeat,
            sweep
        );
    }
    Ok(())
}

pub fn validate_slot_size(bytes_per_slot: usize) -> anyhow::Result<()> {
    if bytes_per_slot == 0 || bytes_per_slot + RESPONSE_OVERHEAD > MAX_DATAGRAM {
        anyhow::bail!(
            "bytes per slot must be between 1 and {}, got {}",
            MAX_DATAGRAM - RESPONSE_OVERHEAD,
            bytes_per_slot
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity_knobs_are_distinct() {
        let config = SlaveConfig::default();

        assert_eq!(config.slots_per_block, 4096);
        assert_eq!(config.bytes_per_slot, 61440);
        assert!(validate_slot_size(config.bytes_per_slot).is_ok());
    }

    #[test]
    fn test_validate_slot_size_bounds() {
        assert!(validate_slot_size(0).is_err());
        assert!(validate_slot_size(65536).is_err());
        assert!(validate_slot_size(4096).is_ok());
    }

    #[test]
    fn test_validate_liveness_ratio() {
        assert!(validate_liveness(DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_SWEEP_INTERVAL).is_ok());
        assert!(validate_liveness(Duration::from_secs(5), Duration::from_secs(5)).is_err());
        assert!(validate_liveness(Duration::from_secs(10), Duration::from_secs(5)).is_err());
    }
}
