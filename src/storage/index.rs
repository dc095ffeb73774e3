//! Tag Index
//!
//! In-memory map from tag to the block slot holding its content. Entries are
//! published a whole block at a time, after the block is durable, and are
//! never removed or repointed.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::block::{BlockLocation, BlockStore};
use crate::directory::types::Tag;
use crate::error::{DfsError, Result};

#[derive(Default)]
pub struct TagIndex {
    entries: RwLock<HashMap<Tag, BlockLocation>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every entry of one flushed block visible in a single step.
    pub fn publish(&self, batch: Vec<(Tag, BlockLocation)>) {
        let mut entries = self.entries.write();

        for (tag, location) in batch {
            if let Some(existing) = entries.get(&tag) {
                tracing::warn!(
                    "Tag {} already indexed at {}#{}, ignoring {}#{}",
                    tag,
                    existing.block,
                    existing.slot,
                    location.block,
                    location.slot
                );
                continue;
            }
            entries.insert(tag, location);
        }
    }

    pub fn lookup(&self, tag: &Tag) -> Result<BlockLocation> {
        self.entries
            .read()
            .get(tag)
            .cloned()
            .ok_or_else(|| DfsError::UnknownTag(tag.clone()))
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.entries.read().contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read path: resolves a tag through the index and returns its raw slot.
pub struct TagReader {
    index: Arc<TagIndex>,
    store: BlockStore,
}

impl TagReader {
    pub fn new(index: Arc<TagIndex>, store: BlockStore) -> Self {
        Self { index, store }
    }

    /// Returns exactly `bytes_per_slot` bytes, padding included. Storage
    /// failures surface as `StorageUnavailable` and are not retried.
    pub fn read(&self, tag: &Tag) -> Result<Vec<u8>> {
        let location = self.index.lookup(tag)?;
        self.store.read_slot(&location)
    }
}
