//! HTTP status surface of a slave.

use axum::{Json, extract::Extension, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::batcher::WriteBatcher;
use super::ledger::CapacityLedger;

pub const ENDPOINT_STATUS: &str = "/status";

#[derive(Debug, Serialize, Deserialize)]
pub struct SlaveStatusResponse {
    pub queued_writes: usize,
    pub indexed_tags: usize,
    pub blocks_written: u64,
    pub clients_with_credit: usize,
    pub slots_per_block: usize,
    pub bytes_per_slot: usize,
}

pub async fn handle_slave_status(
    Extension(batcher): Extension<Arc<WriteBatcher>>,
    Extension(ledger): Extension<Arc<CapacityLedger>>,
) -> (StatusCode, Json<SlaveStatusResponse>) {
    (
        StatusCode::OK,
        Json(SlaveStatusResponse {
            queued_writes: batcher.queued(),
            indexed_tags: batcher.index().len(),
            blocks_written: batcher.blocks_written(),
            clients_with_credit: ledger.clients_with_credit(),
            slots_per_block: batcher.slots_per_block(),
            bytes_per_slot: batcher.bytes_per_slot(),
        }),
    )
}
