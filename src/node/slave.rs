use anyhow::Result;
use axum::{Extension, Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::SlaveConfig;
use crate::membership::agent::SlaveMasterService;
use crate::membership::types::SlaveId;
use crate::storage::batcher::{FlushedBlock, WriteBatcher};
use crate::storage::block::BlockStore;
use crate::storage::handlers::{ENDPOINT_STATUS, handle_slave_status};
use crate::storage::index::{TagIndex, TagReader};
use crate::storage::ledger::CapacityLedger;
use crate::storage::service::{SlaveClientService, bind_client_sockets};

/// Slave server container: block storage, the client intake and the agent
/// that keeps the slave registered with the master.
pub struct SlaveServer {
    pub id: SlaveId,
    pub batcher: Arc<WriteBatcher>,
    pub ledger: Arc<CapacityLedger>,
    write_addr: SocketAddr,
    fetch_addr: SocketAddr,
    cancel: CancellationToken,
}

impl SlaveServer {
    pub async fn start(config: SlaveConfig) -> Result<Self> {
        let cancel = CancellationToken::new();

        // 1. Storage:
        let store = BlockStore::open(&config.storage_root, config.bytes_per_slot)?;
        let index = Arc::new(TagIndex::new());
        let batcher = Arc::new(WriteBatcher::new(
            store.clone(),
            index.clone(),
            config.slots_per_block,
        ));
        let reader = Arc::new(TagReader::new(index, store));
        let ledger = Arc::new(CapacityLedger::new());

        // 2. Client intake. Bound before registering so the master never
        // hands out an endpoint nobody listens on.
        let (write_socket, fetch_socket) =
            bind_client_sockets(config.bind_ip, config.client_port).await?;
        let client_service = SlaveClientService::new(
            write_socket,
            fetch_socket,
            batcher.clone(),
            reader,
            ledger.clone(),
            cancel.clone(),
        );
        let write_addr = client_service.write_addr()?;
        let fetch_addr = client_service.fetch_addr()?;

        // 3. Register with the master:
        let agent = SlaveMasterService::new(
            config.control_addr,
            config.master_addr,
            write_addr.port(),
            config.memory,
            ledger.clone(),
            config.heartbeat_interval,
            config.register_timeout,
            config.register_attempts,
            cancel.clone(),
        )
        .await?;
        let id = agent.id.clone();

        client_service.start().await;
        agent.start().await;

        // 4. Optional HTTP status surface:
        if let Some(http_addr) = config.http_addr {
            let app = Router::new()
                .route(ENDPOINT_STATUS, get(handle_slave_status))
                .layer(Extension(batcher.clone()))
                .layer(Extension(ledger.clone()));
            super::serve_http(http_addr, app, cancel.clone()).await?;
        }

        // 5. Stats reporter:
        let stats_batcher = batcher.clone();
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
                    "Slave stats: {} queued, {} indexed, {} blocks",
                    stats_batcher.queued(),
                    stats_batcher.index().len(),
                    stats_batcher.blocks_written()
                );
            }
        });

        tracing::info!(
            "Slave {} accepting writes on {} and fetches on {}",
            id.0,
            write_addr,
            fetch_addr
        );

        Ok(Self {
            id,
            batcher,
            ledger,
            write_addr,
            fetch_addr,
            cancel,
        })
    }

    pub fn write_addr(&self) -> SocketAddr {
        self.write_addr
    }

    pub fn fetch_addr(&self) -> SocketAddr {
        self.fetch_addr
    }

    /// Stops all workers, then flushes whatever is still queued so no
    /// accepted write is lost.
    pub async fn shutdown(&self) -> Result<Vec<FlushedBlock>> {
        tracing::info!("Shutting down slave {}", self.id.0);
        self.cancel.cancel();

        let batcher = self.batcher.clone();
        let flushed = tokio::task::spawn_blocking(move || batcher.flush()).await??;

        tracing::info!("Final flush wrote {} block(s)", flushed.len());
        Ok(flushed)
    }
}
