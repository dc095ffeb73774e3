use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::placement::PlacementDirectory;
use super::protocol::{MasterRequest, MasterResponse};
use crate::error::DfsError;
use crate::membership::types::PendingGrant;

const RECV_BUFFER_SIZE: usize = 65536;

/// Client-facing side of the master: answers Submit and Resolve requests.
///
/// Every successful placement also queues one write credit for the client on
/// the chosen slave.
pub struct MasterClientService {
    pub directory: Arc<PlacementDirectory>,
    socket: Arc<UdpSocket>,
    grants: mpsc::UnboundedSender<PendingGrant>,
    cancel: CancellationToken,
}

impl MasterClientService {
    pub async fn new(
        bind_addr: SocketAddr,
        directory: Arc<PlacementDirectory>,
        grants: mpsc::UnboundedSender<PendingGrant>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, DfsError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| DfsError::CouldNotOpen {
                addr: bind_addr,
                source,
            })?;

        Ok(Arc::new(Self {
            directory,
            socket: Arc::new(socket),
            grants,
            cancel,
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn start(self: Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move {
            service.receive_loop().await;
        });

        tracing::info!("Client-facing service started");
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match bincode::deserialize::<MasterRequest>(&buf[..len]) {
                    Ok(request) => {
                        let response = self.handle_request(request, src);
                        if let Err(e) = self.reply(&response, src).await {
                            tracing::error!("Failed to reply to {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize client request from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracing::info!("Client-facing receive loop stopped");
    }

    pub fn handle_request(&self, request: MasterRequest, src: SocketAddr) -> MasterResponse {
        match request {
            MasterRequest::Submit { path } => {
                let result = self.directory.submit(&path);

                if let Ok(location) = &result {
                    let grant = PendingGrant {
                        slave: location.slave,
                        client: src.ip(),
                    };
                    if self.grants.send(grant).is_err() {
                        tracing::warn!("Grant emitter stopped, {} gets no credit", src);
                    }
                }

                result.into()
            }

            MasterRequest::Resolve { path } => {
                tracing::debug!("Resolve {} for {}", path, src);
                self.directory.resolve(&path).into()
            }
        }
    }

    async fn reply(&self, response: &MasterResponse, dst: SocketAddr) -> Result<()> {
        let encoded = bincode::serialize(response)?;
        self.socket.send_to(&encoded, dst).await?;
        Ok(())
    }
}
