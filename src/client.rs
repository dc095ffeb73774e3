//! UDP client for the cluster.
//!
//! Talks to the master to place and resolve paths, then directly to the
//! slave named in the returned location to write or fetch content. One
//! request is in flight at a time. Lost datagrams are not retried; the only
//! retry is `put` waiting for its write credit to reach the slave.

use anyhow::{Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::directory::protocol::{MasterRequest, MasterResponse};
use crate::directory::types::PathLocation;
use crate::storage::protocol::{RejectReason, SlaveRequest, SlaveResponse};

const RECV_BUFFER_SIZE: usize = 65536;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// The grant for a fresh placement travels master -> slave while the client
/// already talks to the slave, so the first write can beat its credit.
const CREDIT_RETRIES: usize = 10;
const CREDIT_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct DfsClient {
    socket: UdpSocket,
    master: SocketAddr,
    timeout: Duration,
    buf: Vec<u8>,
}

impl DfsClient {
    pub async fn connect(bind_addr: SocketAddr, master: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(Self {
            socket,
            master,
            timeout: DEFAULT_TIMEOUT,
            buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn submit(&mut self, path: &str) -> Result<MasterResponse> {
        let request = MasterRequest::Submit {
            path: path.to_string(),
        };
        let master = self.master;
        self.request(master, &request).await
    }

    pub async fn resolve(&mut self, path: &str) -> Result<MasterResponse> {
        let request = MasterRequest::Resolve {
            path: path.to_string(),
        };
        let master = self.master;
        self.request(master, &request).await
    }

    pub async fn write(&mut self, location: &PathLocation, content: Vec<u8>) -> Result<SlaveResponse> {
        let request = SlaveRequest::Write {
            tag: location.tag.clone(),
            content,
        };
        self.request(location.slave.write_addr(), &request).await
    }

    /// Fetches the raw slot for `location`, padding included.
    pub async fn fetch(&mut self, location: &PathLocation) -> Result<SlaveResponse> {
        let request = SlaveRequest::Fetch {
            tag: location.tag.clone(),
        };
        self.request(location.slave.fetch_addr(), &request).await
    }

    /// Places `path` and writes `content` to the chosen slave.
    pub async fn put(&mut self, path: &str, content: Vec<u8>) -> Result<PathLocation> {
        let location = match self.submit(path).await? {
            MasterResponse::Located(location) => location,
            other => bail!("submit of {} failed: {:?}", path, other),
        };

        let mut attempt = 0;
        loop {
            match self.write(&location, content.clone()).await? {
                SlaveResponse::Accepted { .. } => return Ok(location),
                SlaveResponse::Rejected {
                    reason: RejectReason::NoCredit,
                    ..
                } if attempt < CREDIT_RETRIES => {
                    attempt += 1;
                    tracing::debug!("No credit yet on {} for {}, retrying", location.slave, path);
                    tokio::time::sleep(CREDIT_RETRY_DELAY).await;
                }
                other => bail!("write of {} to {} failed: {:?}", path, location, other),
            }
        }
    }

    /// Resolves `path` and returns its slot exactly as stored.
    pub async fn get(&mut self, path: &str) -> Result<Vec<u8>> {
        let location = match self.resolve(path).await? {
            MasterResponse::Located(location) => location,
            other => bail!("resolve of {} failed: {:?}", path, other),
        };

        match self.fetch(&location).await? {
            SlaveResponse::Content { bytes, .. } => Ok(bytes),
            other => bail!("fetch of {} from {} failed: {:?}", path, location, other),
        }
    }

    async fn request<Req, Resp>(&mut self, dst: SocketAddr, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let encoded = bincode::serialize(request)?;
        self.socket.send_to(&encoded, dst).await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let (len, src) =
                match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut self.buf)).await {
                    Ok(received) => received?,
                    Err(_) => bail!("no response from {} within {:?}", dst, self.timeout),
                };

            if src != dst {
                tracing::debug!("Ignoring datagram from {} while waiting on {}", src, dst);
                continue;
            }

            return Ok(bincode::deserialize(&self.buf[..len])?);
        }
    }
}

/// Strips the zero padding a slot carries after its content.
///
/// Only safe for content that does not itself end in zero bytes.
pub fn trim_padding(slot: &[u8]) -> &[u8] {
    let end = slot
        .iter()
        .rposition(|byte| *byte != crate::storage::block::PAD_BYTE)
        .map(|idx| idx + 1)
        .unwrap_or(0);
    &slot[..end]
}
