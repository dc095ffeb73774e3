use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::protocol::{ControlMessage, join_clients};
use super::registry::SlaveRegistry;
use super::types::{PendingGrant, SlaveEndpoint, SlaveId};
use crate::error::DfsError;

const RECV_BUFFER_SIZE: usize = 65536;

/// Master side of the control plane.
///
/// Owns the slave-facing socket and runs three workers:
/// - `receive_loop`: registrations and heartbeats.
/// - `sweep_loop`: periodic liveness sweep over the registry.
/// - `grant_loop`: delivers capacity grants queued by the client service.
pub struct MasterSlaveService {
    pub registry: Arc<SlaveRegistry>,
    socket: Arc<UdpSocket>,
    sweep_interval: Duration,
    grants_tx: mpsc::UnboundedSender<PendingGrant>,
    grants_rx: Mutex<Option<mpsc::UnboundedReceiver<PendingGrant>>>,
    cancel: CancellationToken,
}

impl MasterSlaveService {
    pub async fn new(
        bind_addr: SocketAddr,
        registry: Arc<SlaveRegistry>,
        sweep_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, DfsError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| DfsError::CouldNotOpen {
                addr: bind_addr,
                source,
            })?;
        let (grants_tx, grants_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            registry,
            socket: Arc::new(socket),
            sweep_interval,
            grants_tx,
            grants_rx: Mutex::new(Some(grants_rx)),
            cancel,
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle used by the client service to queue credits for a slave.
    pub fn grant_sender(&self) -> mpsc::UnboundedSender<PendingGrant> {
        self.grants_tx.clone()
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting slave-facing service...");

        let _receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            })
        };

        let _sweep_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.sweep_loop().await;
            })
        };

        let grants_rx = self.grants_rx.lock().take();
        match grants_rx {
            Some(grants_rx) => {
                let service = self.clone();
                tokio::spawn(async move {
                    service.grant_loop(grants_rx).await;
                });
            }
            None => tracing::warn!("Grant emitter already started"),
        }

        tracing::info!("All slave-facing tasks started");
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match bincode::deserialize::<ControlMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling control message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize control message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracing::info!("Slave-facing receive loop stopped");
    }

    async fn handle_message(&self, msg: ControlMessage, src: SocketAddr) -> Result<()> {
        match msg {
            ControlMessage::Register {
                client_port,
                memory,
            } => {
                self.handle_register(client_port, memory, src).await?;
            }

            ControlMessage::Heartbeat { id } => {
                self.handle_heartbeat(id, src);
            }

            other => {
                tracing::warn!("Unexpected control message from {}: {:?}", src, other);
            }
        }

        Ok(())
    }

    async fn handle_register(&self, client_port: u16, memory: u64, src: SocketAddr) -> Result<()> {
        let endpoint = SlaveEndpoint(SocketAddr::new(src.ip(), client_port));
        let id = self.registry.register(endpoint, src, memory);

        let reply = ControlMessage::Registered { id };
        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, src).await?;

        tracing::info!("Cluster size now: {} live slaves", self.registry.len());
        Ok(())
    }

    fn handle_heartbeat(&self, id: SlaveId, src: SocketAddr) {
        if self.registry.heartbeat(&id) {
            tracing::trace!("Heartbeat from {} ({})", src, id.0);
        } else {
            tracing::debug!("Ignoring heartbeat from unregistered slave {} ({})", src, id.0);
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let start = tokio::time::Instant::now() + self.sweep_interval;
        let mut interval = tokio::time::interval_at(start, self.sweep_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let evicted = self.registry.sweep();
            for record in &evicted {
                tracing::warn!(
                    "Slave {} evicted (no heartbeat for {:?})",
                    record.endpoint,
                    self.sweep_interval
                );
            }
            if !evicted.is_empty() {
                tracing::info!("Cluster size now: {} live slaves", self.registry.len());
            }
        }
    }

    async fn grant_loop(self: Arc<Self>, mut grants_rx: mpsc::UnboundedReceiver<PendingGrant>) {
        loop {
            let first = tokio::select! {
                _ = self.cancel.cancelled() => break,
                grant = grants_rx.recv() => match grant {
                    Some(grant) => grant,
                    None => break,
                },
            };

            let mut batch: HashMap<SlaveEndpoint, Vec<IpAddr>> = HashMap::new();
            batch.entry(first.slave).or_default().push(first.client);
            while let Ok(grant) = grants_rx.try_recv() {
                batch.entry(grant.slave).or_default().push(grant.client);
            }

            for (slave, clients) in batch {
                self.send_grant(slave, &clients).await;
            }
        }
    }

    async fn send_grant(&self, slave: SlaveEndpoint, clients: &[IpAddr]) {
        let Some(record) = self.registry.get(&slave) else {
            tracing::warn!(
                "Dropping {} grant(s) for evicted slave {}",
                clients.len(),
                slave
            );
            return;
        };

        let msg = ControlMessage::CapacityGrant {
            clients: join_clients(clients),
        };

        match bincode::serialize(&msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, record.control_addr).await {
                    tracing::error!("Failed to send capacity grant to {}: {}", slave, e);
                } else {
                    tracing::debug!("Granted {} credit(s) on {}", clients.len(), slave);
                }
            }
            Err(e) => tracing::error!("Failed to serialize capacity grant: {}", e),
        }
    }
}
