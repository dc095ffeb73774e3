//! Placement Directory
//!
//! Maps every submitted path to the slave chosen to hold it and the tag the
//! content is stored under.
//!
//! ## Guarantees
//! - A path is placed at most once. The existence check and the insert happen
//!   under the same `DashMap` entry lock, so concurrent submits of one path
//!   yield exactly one success.
//! - The target slave is drawn uniformly from a snapshot of the live set,
//!   with the random index bounded by the snapshot length.
//! - Locations are never repointed, even after their slave is evicted.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use std::sync::Arc;

use super::types::{PathLocation, Tag};
use crate::error::{DfsError, Result};
use crate::membership::registry::SlaveRegistry;

pub struct PlacementDirectory {
    locations: DashMap<String, PathLocation>,
    registry: Arc<SlaveRegistry>,
}

impl PlacementDirectory {
    pub fn new(registry: Arc<SlaveRegistry>) -> Self {
        Self {
            locations: DashMap::new(),
            registry,
        }
    }

    /// Places `path` on a random live slave under a fresh tag.
    ///
    /// Fails with `PathConflict` if the path is already placed and with
    /// `NoCapacity` if no slave is live; neither failure mutates the directory.
    pub fn submit(&self, path: &str) -> Result<PathLocation> {
        match self.locations.entry(path.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!("Rejected resubmission of {}", path);
                Err(DfsError::PathConflict(path.to_string()))
            }
            Entry::Vacant(vacant) => {
                let live = self.registry.live_snapshot();
                if live.is_empty() {
                    tracing::warn!("No live slaves, cannot place {}", path);
                    return Err(DfsError::NoCapacity);
                }

                let idx = rand::thread_rng().gen_range(0..live.len());
                let location = PathLocation {
                    slave: live[idx],
                    tag: Tag::new(),
                };

                tracing::info!("Placed {} at {}", path, location);
                vacant.insert(location.clone());
                Ok(location)
            }
        }
    }

    pub fn resolve(&self, path: &str) -> Result<PathLocation> {
        self.locations
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DfsError::NotFound(path.to_string()))
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
