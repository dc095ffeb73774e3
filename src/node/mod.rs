//! Node Containers
//!
//! Wire the components of one role into a running server. Each container
//! owns a `CancellationToken` shared by all of its workers; cancelling it is
//! the shutdown signal.
//!
//! - **`master`**: Slave Registry, Placement Directory, grant emitter.
//! - **`slave`**: Write Batcher, Tag Index, Capacity Ledger, master agent.

pub mod master;
pub mod slave;

use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

async fn serve_http(addr: SocketAddr, app: Router, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP status server listening on {}", listener.local_addr()?);

    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!("HTTP status server failed: {}", e);
        }
    });

    Ok(())
}
