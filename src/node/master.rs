use anyhow::Result;
use axum::{Extension, Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::MasterConfig;
use crate::directory::handlers::{ENDPOINT_RESOLVE, ENDPOINT_STATUS, handle_master_status, handle_resolve};
use crate::directory::placement::PlacementDirectory;
use crate::directory::service::MasterClientService;
use crate::membership::registry::SlaveRegistry;
use crate::membership::service::MasterSlaveService;

/// Master server container: the registry, the directory and every worker
/// that serves them.
pub struct MasterServer {
    pub registry: Arc<SlaveRegistry>,
    pub directory: Arc<PlacementDirectory>,
    client_addr: SocketAddr,
    slave_addr: SocketAddr,
    cancel: CancellationToken,
}

impl MasterServer {
    pub async fn start(config: MasterConfig) -> Result<Self> {
        let cancel = CancellationToken::new();
        let registry = Arc::new(SlaveRegistry::new());
        let directory = Arc::new(PlacementDirectory::new(registry.clone()));

        // 1. Slave-facing control plane (registration, heartbeats, sweep, grants):
        let slave_service = MasterSlaveService::new(
            config.slave_addr,
            registry.clone(),
            config.sweep_interval,
            cancel.clone(),
        )
        .await?;
        let slave_addr = slave_service.local_addr()?;

        // 2. Client-facing directory:
        let client_service = MasterClientService::new(
            config.client_addr,
            directory.clone(),
            slave_service.grant_sender(),
            cancel.clone(),
        )
        .await?;
        let client_addr = client_service.local_addr()?;

        slave_service.start().await;
        client_service.start().await;

        // 3. Optional HTTP status surface:
        if let Some(http_addr) = config.http_addr {
            let app = Router::new()
                .route(ENDPOINT_STATUS, get(handle_master_status))
                .route(ENDPOINT_RESOLVE, get(handle_resolve))
                .layer(Extension(registry.clone()))
                .layer(Extension(directory.clone()));
            super::serve_http(http_addr, app, cancel.clone()).await?;
        }

        // 4. Stats reporter:
        let stats_registry = registry.clone();
        let stats_directory = directory.clone();
        let stats_cancel = cancel.clone();
        let stats_interval = config.stats_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(stats_interval);

            loop {
                tokio::select! {
                    _ = stats_cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                tracing::info!(
                    "Cluster stats: {} live slaves, {} placed paths",
                    stats_registry.len(),
                    stats_directory.len()
                );
                for record in stats_registry.records() {
                    tracing::info!(
                        "  - {} id={} memory={}",
                        record.endpoint,
                        record.id.0,
                        record.memory
                    );
                }
            }
        });

        tracing::info!(
            "Master listening for clients on {} and slaves on {}",
            client_addr,
            slave_addr
        );

        Ok(Self {
            registry,
            directory,
            client_addr,
            slave_addr,
            cancel,
        })
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn slave_addr(&self) -> SocketAddr {
        self.slave_addr
    }

    /// Stops accepting requests and releases the sockets. The directory is
    /// held in memory only and is dropped with the server.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down master");
        self.cancel.cancel();
    }
}
