//! HTTP status surface of the master.

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::placement::PlacementDirectory;
use super::types::PathLocation;
use crate::membership::registry::SlaveRegistry;

pub const ENDPOINT_STATUS: &str = "/status";
pub const ENDPOINT_RESOLVE: &str = "/resolve";

#[derive(Debug, Serialize, Deserialize)]
pub struct SlaveStatus {
    pub endpoint: String,
    pub id: String,
    pub memory: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MasterStatusResponse {
    pub live_slaves: Vec<SlaveStatus>,
    pub placed_paths: usize,
}

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub path: String,
}

pub async fn handle_master_status(
    Extension(registry): Extension<Arc<SlaveRegistry>>,
    Extension(directory): Extension<Arc<PlacementDirectory>>,
) -> (StatusCode, Json<MasterStatusResponse>) {
    let live_slaves = registry
        .records()
        .into_iter()
        .map(|record| SlaveStatus {
            endpoint: record.endpoint.to_string(),
            id: record.id.0,
            memory: record.memory,
        })
        .collect();

    (
        StatusCode::OK,
        Json(MasterStatusResponse {
            live_slaves,
            placed_paths: directory.len(),
        }),
    )
}

pub async fn handle_resolve(
    Extension(directory): Extension<Arc<PlacementDirectory>>,
    Query(params): Query<ResolveParams>,
) -> (StatusCode, Json<Option<PathLocation>>) {
    match directory.resolve(&params.path) {
        Ok(location) => (StatusCode::OK, Json(Some(location))),
        Err(e) => {
            tracing::debug!("HTTP resolve failed: {}", e);
            (StatusCode::NOT_FOUND, Json(None))
        }
    }
}
