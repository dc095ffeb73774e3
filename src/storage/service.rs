use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::batcher::WriteBatcher;
use super::index::TagReader;
use super::ledger::CapacityLedger;
use super::protocol::{RejectReason, SlaveRequest, SlaveResponse};
use crate::directory::types::Tag;
use crate::error::{DfsError, Result};
use crate::membership::types::FETCH_PORT_OFFSET;

const RECV_BUFFER_SIZE: usize = 65536;

/// Client-facing side of a slave.
///
/// Runs two independent intake workers: `write_loop` on the write port and
/// `fetch_loop` on the fetch port. Block I/O is pushed onto the blocking
/// thread pool so neither loop stalls the runtime.
pub struct SlaveClientService {
    pub batcher: Arc<WriteBatcher>,
    pub reader: Arc<TagReader>,
    pub ledger: Arc<CapacityLedger>,
    write_socket: Arc<UdpSocket>,
    fetch_socket: Arc<UdpSocket>,
    cancel: CancellationToken,
}

impl SlaveClientService {
    pub fn new(
        write_socket: UdpSocket,
        fetch_socket: UdpSocket,
        batcher: Arc<WriteBatcher>,
        reader: Arc<TagReader>,
        ledger: Arc<CapacityLedger>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            batcher,
            reader,
            ledger,
            write_socket: Arc::new(write_socket),
            fetch_socket: Arc::new(fetch_socket),
            cancel,
        })
    }

    pub fn write_addr(&self) -> std::io::Result<SocketAddr> {
        self.write_socket.local_addr()
    }

    pub fn fetch_addr(&self) -> std::io::Result<SocketAddr> {
        self.fetch_socket.local_addr()
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting client-facing service...");

        let _write_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.write_loop().await;
            })
        };

        let _fetch_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.fetch_loop().await;
            })
        };

        tracing::info!("Write and fetch workers started");
    }

    async fn write_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.write_socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match bincode::deserialize::<SlaveRequest>(&buf[..len]) {
                    Ok(SlaveRequest::Write { tag, content }) => {
                        let response = self.handle_write(tag, content, src).await;
                        self.reply(&self.write_socket, &response, src).await;
                    }
                    Ok(SlaveRequest::Fetch { tag }) => {
                        tracing::warn!("Fetch for {} sent to write port by {}", tag, src);
                        let response = SlaveResponse::Rejected {
                            tag,
                            reason: RejectReason::WrongPort,
                        };
                        self.reply(&self.write_socket, &response, src).await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize write request from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracing::info!("Write loop stopped");
    }

    async fn fetch_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.fetch_socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match bincode::deserialize::<SlaveRequest>(&buf[..len]) {
                    Ok(SlaveRequest::Fetch { tag }) => {
                        let response = self.handle_fetch(tag).await;
                        self.reply(&self.fetch_socket, &response, src).await;
                    }
                    Ok(SlaveRequest::Write { tag, .. }) => {
                        tracing::warn!("Write for {} sent to fetch port by {}", tag, src);
                        let response = SlaveResponse::Rejected {
                            tag,
                            reason: RejectReason::WrongPort,
                        };
                        self.reply(&self.fetch_socket, &response, src).await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize fetch request from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracing::info!("Fetch loop stopped");
    }

    /// Checks size, then credit, then queues the write.
    ///
    /// Oversized content is rejected before any credit is spent.
    pub async fn handle_write(&self, tag: Tag, content: Vec<u8>, src: SocketAddr) -> SlaveResponse {
        let max = self.batcher.bytes_per_slot();
        if content.len() > max {
            tracing::debug!("Rejected {} from {}: {} bytes", tag, src, content.len());
            return SlaveResponse::Rejected {
                tag,
                reason: RejectReason::ContentTooLarge {
                    len: content.len(),
                    max,
                },
            };
        }

        if !self.ledger.try_spend(src.ip()) {
            tracing::debug!("Rejected {} from {}: {}", tag, src, DfsError::CreditExhausted(src.ip()));
            return SlaveResponse::Rejected {
                tag,
                reason: RejectReason::NoCredit,
            };
        }

        let batcher = self.batcher.clone();
        let queued_tag = tag.clone();
        let result = tokio::task::spawn_blocking(move || batcher.enqueue(queued_tag, content)).await;

        match result {
            Ok(Ok(_)) => {
                tracing::debug!("Queued {} from {}", tag, src);
                SlaveResponse::Accepted { tag }
            }
            Ok(Err(DfsError::ContentTooLarge { len, max })) => {
                self.ledger.grant(src.ip(), 1);
                SlaveResponse::Rejected {
                    tag,
                    reason: RejectReason::ContentTooLarge { len, max },
                }
            }
            Ok(Err(e)) => {
                // The write was dropped with its block, so the credit is returned.
                tracing::error!("Write of {} failed: {}", tag, e);
                self.ledger.grant(src.ip(), 1);
                SlaveResponse::Rejected {
                    tag,
                    reason: RejectReason::StorageUnavailable,
                }
            }
            Err(e) => {
                tracing::error!("Write worker for {} panicked: {}", tag, e);
                SlaveResponse::Rejected {
                    tag,
                    reason: RejectReason::StorageUnavailable,
                }
            }
        }
    }

    pub async fn handle_fetch(&self, tag: Tag) -> SlaveResponse {
        let reader = self.reader.clone();
        let lookup = tag.clone();
        let result = tokio::task::spawn_blocking(move || reader.read(&lookup)).await;

        match result {
            Ok(Ok(bytes)) => SlaveResponse::Content { tag, bytes },
            Ok(Err(DfsError::UnknownTag(_))) => {
                tracing::debug!("Fetch for unknown tag {}", tag);
                SlaveResponse::UnknownTag { tag }
            }
            Ok(Err(e)) => {
                tracing::error!("Could not read {}: {}", tag, e);
                SlaveResponse::StorageUnavailable { tag }
            }
            Err(e) => {
                tracing::error!("Read worker for {} panicked: {}", tag, e);
                SlaveResponse::StorageUnavailable { tag }
            }
        }
    }

    async fn reply(&self, socket: &UdpSocket, response: &SlaveResponse, dst: SocketAddr) {
        match bincode::serialize(response) {
            Ok(encoded) => {
                if let Err(e) = socket.send_to(&encoded, dst).await {
                    tracing::error!("Failed to reply to {}: {}", dst, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize response: {}", e),
        }
    }
}

const EPHEMERAL_BIND_ATTEMPTS: usize = 16;

/// Binds the write socket on `port` and the fetch socket on `port + 1`.
///
/// With `port == 0` an ephemeral write port is picked and retried until the
/// port above it is free too, so `SlaveEndpoint::fetch_addr` stays valid.
pub async fn bind_client_sockets(ip: IpAddr, port: u16) -> Result<(UdpSocket, UdpSocket)> {
    if port != 0 {
        let write_socket = bind(SocketAddr::new(ip, port)).await?;
        let fetch_socket = bind(SocketAddr::new(ip, port.wrapping_add(FETCH_PORT_OFFSET))).await?;
        return Ok((write_socket, fetch_socket));
    }

    let mut last_error = None;
    for _ in 0..EPHEMERAL_BIND_ATTEMPTS {
        let write_socket = bind(SocketAddr::new(ip, 0)).await?;
        let write_port = write_socket
            .local_addr()
            .map_err(|source| DfsError::CouldNotOpen {
                addr: SocketAddr::new(ip, 0),
                source,
            })?
            .port();

        match bind(SocketAddr::new(ip, write_port.wrapping_add(FETCH_PORT_OFFSET))).await {
            Ok(fetch_socket) => return Ok((write_socket, fetch_socket)),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or(DfsError::CouldNotOpen {
        addr: SocketAddr::new(ip, 0),
        source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
    }))
}

async fn bind(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| DfsError::CouldNotOpen { addr, source })
}
