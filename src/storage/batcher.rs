//! Write Batcher
//!
//! Accumulates incoming writes in a FIFO queue and drains them into block
//! files, one slot per write.
//!
//! ## Flushing
//! - **Automatic**: as soon as the queue holds `slots_per_block` writes.
//! - **Explicit**: `flush()` drains everything queued, including a partial
//!   block (used at shutdown).
//!
//! The queue lock is held for the whole flush, so enqueues and flushes are
//! fully serialized and only one flush drains the queue at a time. Index
//! entries are published only after the block file has been synced.
//!
//! ## Failure
//! A block's writes are dequeued before its file is created. If any step of
//! the block write fails, those writes are dropped and never indexed, and
//! the flush reports `StorageUnavailable`. They are not retried. A write
//! rejected by `enqueue` therefore never becomes readable later, and the
//! queue never holds more than `slots_per_block` writes.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::block::{BlockLocation, BlockStore, Slot};
use super::index::TagIndex;
use crate::directory::types::Tag;
use crate::error::Result;

/// A write waiting in the queue for the next flush.
#[derive(Debug, Clone)]
pub struct ScheduledWrite {
    pub tag: Tag,
    pub slot: Slot,
}

/// Summary of one block produced by a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedBlock {
    pub block: String,
    pub entries: usize,
}

pub struct WriteBatcher {
    queue: Mutex<VecDeque<ScheduledWrite>>,
    store: BlockStore,
    index: Arc<TagIndex>,
    slots_per_block: usize,
    blocks_written: AtomicU64,
}

impl WriteBatcher {
    pub fn new(store: BlockStore, index: Arc<TagIndex>, slots_per_block: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(slots_per_block)),
            store,
            index,
            slots_per_block: slots_per_block.max(1),
            blocks_written: AtomicU64::new(0),
        }
    }

    /// Queues `content` under `tag`, flushing a full block if this write
    /// fills the queue up to the threshold.
    ///
    /// Content larger than one slot is rejected before it is queued. If the
    /// triggered flush fails, this write is dropped along with its block.
    pub fn enqueue(&self, tag: Tag, content: Vec<u8>) -> Result<Option<FlushedBlock>> {
        let slot = Slot::new(content, self.store.bytes_per_slot())?;

        let mut queue = self.queue.lock();
        queue.push_back(ScheduledWrite { tag, slot });

        if queue.len() >= self.slots_per_block {
            let flushed = self.write_block(&mut queue)?;
            return Ok(Some(flushed));
        }

        Ok(None)
    }

    /// Drains everything currently queued into as many blocks as needed.
    pub fn flush(&self) -> Result<Vec<FlushedBlock>> {
        let mut queue = self.queue.lock();
        let mut flushed = Vec::new();

        while !queue.is_empty() {
            flushed.push(self.write_block(&mut queue)?);
        }

        Ok(flushed)
    }

    fn write_block(&self, queue: &mut VecDeque<ScheduledWrite>) -> Result<FlushedBlock> {
        let n = self.slots_per_block.min(queue.len());
        let pending: Vec<ScheduledWrite> = queue.drain(..n).collect();

        let (block, batch) = match self.store_block(&pending) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!("Dropping {} dequeued write(s): {}", pending.len(), e);
                return Err(e);
            }
        };

        let entries = batch.len();
        self.index.publish(batch);
        self.blocks_written.fetch_add(1, Ordering::Relaxed);

        tracing::info!("Flushed block {} with {} slot(s)", block, entries);
        Ok(FlushedBlock { block, entries })
    }

    fn store_block(&self, pending: &[ScheduledWrite]) -> Result<(String, Vec<(Tag, BlockLocation)>)> {
        let mut writer = self.store.create_block()?;
        let mut batch = Vec::with_capacity(pending.len());

        for write in pending {
            let slot = writer.append(&write.slot)?;
            batch.push((
                write.tag.clone(),
                BlockLocation {
                    block: writer.name().to_string(),
                    slot,
                },
            ));
        }

        let block = writer.finish()?;
        Ok((block, batch))
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written.load(Ordering::Relaxed)
    }

    pub fn index(&self) -> &Arc<TagIndex> {
        &self.index
    }

    pub fn slots_per_block(&self) -> usize {
        self.slots_per_block
    }

    pub fn bytes_per_slot(&self) -> usize {
        self.store.bytes_per_slot()
    }
}
