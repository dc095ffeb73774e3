//! Slave Agent
//!
//! The slave's half of the control plane: registers with the master, keeps
//! the registration alive with heartbeats and applies the capacity grants the
//! master sends back.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::protocol::{ControlMessage, split_clients};
use super::types::SlaveId;
use crate::error::{DfsError, Result};
use crate::storage::ledger::CapacityLedger;

const RECV_BUFFER_SIZE: usize = 65536;

pub struct SlaveMasterService {
    pub id: SlaveId,
    master_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    ledger: Arc<CapacityLedger>,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
}

impl SlaveMasterService {
    /// Binds the control socket and registers with the master.
    ///
    /// Fails with `CouldNotRegister` if the master does not acknowledge any of
    /// `attempts` registration requests within `timeout` each.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        bind_addr: SocketAddr,
        master_addr: SocketAddr,
        client_port: u16,
        memory: u64,
        ledger: Arc<CapacityLedger>,
        heartbeat_interval: Duration,
        timeout: Duration,
        attempts: usize,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| DfsError::CouldNotOpen {
                addr: bind_addr,
                source,
            })?;

        let id = register(&socket, master_addr, client_port, memory, timeout, attempts).await?;
        tracing::info!("Registered with master {} as {}", master_addr, id.0);

        Ok(Arc::new(Self {
            id,
            master_addr,
            socket: Arc::new(socket),
            ledger,
            heartbeat_interval,
            cancel,
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn start(self: Arc<Self>) {
        let _heartbeat_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.heartbeat_loop().await;
            })
        };

        let _orchestration_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.orchestration_loop().await;
            })
        };

        tracing::info!("Heartbeat and orchestration workers started");
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.heartbeat_interval);
        let msg = ControlMessage::Heartbeat {
            id: self.id.clone(),
        };

        let encoded = match bincode::serialize(&msg) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to serialize heartbeat: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.socket.send_to(&encoded, self.master_addr).await {
                tracing::error!(
                    "Could not send heartbeat to master at {}: {}",
                    self.master_addr,
                    e
                );
            }
        }
    }

    async fn orchestration_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => {
                    if src.ip() != self.master_addr.ip() {
                        tracing::debug!("Received packet from unknown host {}", src);
                        continue;
                    }

                    match bincode::deserialize::<ControlMessage>(&buf[..len]) {
                        Ok(ControlMessage::CapacityGrant { clients }) => {
                            self.apply_grant(&clients);
                        }
                        Ok(ControlMessage::Registered { .. }) => {
                            tracing::debug!("Duplicate registration ack from {}", src);
                        }
                        Ok(other) => {
                            tracing::warn!("Unexpected control message from {}: {:?}", src, other);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to deserialize control message from {}: {}", src, e);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Could not receive communications from the master: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn apply_grant(&self, clients: &str) {
        let (granted, invalid) = split_clients(clients);

        for entry in invalid {
            tracing::warn!("Skipping unparseable client address in grant: {}", entry);
        }
        for client in &granted {
            self.ledger.grant(*client, 1);
        }

        tracing::debug!("Applied {} credit(s) from master", granted.len());
    }
}

async fn register(
    socket: &UdpSocket,
    master_addr: SocketAddr,
    client_port: u16,
    memory: u64,
    timeout: Duration,
    attempts: usize,
) -> Result<SlaveId> {
    let msg = ControlMessage::Register {
        client_port,
        memory,
    };
    let encoded = bincode::serialize(&msg).map_err(|e| {
        tracing::error!("Failed to serialize registration: {}", e);
        DfsError::CouldNotRegister(master_addr)
    })?;

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    for attempt in 1..=attempts.max(1) {
        if let Err(e) = socket.send_to(&encoded, master_addr).await {
            tracing::error!(
                "Could not register slave with {} bytes of memory: {}",
                memory,
                e
            );
            return Err(DfsError::CouldNotRegister(master_addr));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;

            match received {
                Ok(Ok((len, src))) if src.ip() == master_addr.ip() => {
                    match bincode::deserialize::<ControlMessage>(&buf[..len]) {
                        Ok(ControlMessage::Registered { id }) => return Ok(id),
                        Ok(other) => {
                            tracing::debug!("Ignoring {:?} while registering", other);
                        }
                        Err(e) => {
                            tracing::warn!("Malformed registration reply from {}: {}", src, e);
                        }
                    }
                }
                Ok(Ok((_, src))) => {
                    tracing::debug!("Ignoring packet from {} while registering", src);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Receive failed while registering: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        tracing::warn!(
            "No registration ack from {} (attempt {}/{})",
            master_addr,
            attempt,
            attempts
        );
    }

    Err(DfsError::CouldNotRegister(master_addr))
}
