//! Block file format.
//!
//! A block file is a flat sequence of fixed-size slots written by one flush:
//!
//! ```text
//! | slot 0 (bytes_per_slot) | slot 1 (bytes_per_slot) | ... | slot n-1 |
//! ```
//!
//! Slot `i` starts at byte `i * bytes_per_slot`. Content shorter than a slot
//! is zero-padded; there is no header, footer or length prefix, so a read
//! returns the padded slot exactly as written. Files are named
//! `<uuid>.block`, created once and never appended to afterwards.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DfsError, Result};

pub const BLOCK_SUFFIX: &str = ".block";

/// Byte used to pad content up to the slot size.
pub const PAD_BYTE: u8 = 0;

/// A content buffer already padded to exactly one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot(Vec<u8>);

impl Slot {
    /// Pads `content` to `bytes_per_slot`. Content that does not fit is
    /// rejected here rather than truncated at flush time.
    pub fn new(mut content: Vec<u8>, bytes_per_slot: usize) -> Result<Self> {
        if content.len() > bytes_per_slot {
            return Err(DfsError::ContentTooLarge {
                len: content.len(),
                max: bytes_per_slot,
            });
        }
        content.resize(bytes_per_slot, PAD_BYTE);
        Ok(Self(content))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Position of one tag's slot on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockLocation {
    /// File name relative to the storage root.
    pub block: String,
    pub slot: u32,
}

/// The directory block files live in.
#[derive(Debug, Clone)]
pub struct BlockStore {
    root: PathBuf,
    bytes_per_slot: usize,
}

impl BlockStore {
    pub fn open(root: impl Into<PathBuf>, bytes_per_slot: usize) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| DfsError::storage(format!("creating {}", root.display()), e))?;

        Ok(Self {
            root,
            bytes_per_slot,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bytes_per_slot(&self) -> usize {
        self.bytes_per_slot
    }

    /// Creates a new, empty block file under a fresh unique name.
    pub fn create_block(&self) -> Result<BlockWriter> {
        let name = format!("{}{}", uuid::Uuid::new_v4(), BLOCK_SUFFIX);
        let path = self.root.join(&name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| DfsError::storage(format!("creating block {}", name), e))?;

        Ok(BlockWriter {
            name,
            out: BufWriter::new(file),
            slots: 0,
        })
    }

    /// Reads slot `location.slot` of `location.block`, padding included.
    pub fn read_slot(&self, location: &BlockLocation) -> Result<Vec<u8>> {
        let path = self.root.join(&location.block);
        let offset = location.slot as u64 * self.bytes_per_slot as u64;

        let mut file = File::open(&path)
            .map_err(|e| DfsError::storage(format!("opening block {}", location.block), e))?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| {
            DfsError::storage(format!("seeking to slot {} of {}", location.slot, location.block), e)
        })?;

        let mut buf = vec![0u8; self.bytes_per_slot];
        file.read_exact(&mut buf).map_err(|e| {
            DfsError::storage(format!("reading slot {} of {}", location.slot, location.block), e)
        })?;

        Ok(buf)
    }
}

/// Appends slots to a freshly created block file.
pub struct BlockWriter {
    name: String,
    out: BufWriter<File>,
    slots: u32,
}

impl BlockWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes `slot` and returns its index within the block.
    pub fn append(&mut self, slot: &Slot) -> Result<u32> {
        self.out
            .write_all(slot.as_bytes())
            .map_err(|e| DfsError::storage(format!("writing block {}", self.name), e))?;

        let idx = self.slots;
        self.slots += 1;
        Ok(idx)
    }

    /// Flushes buffered bytes and syncs the file. Only after this returns may
    /// the slots be made visible to readers.
    pub fn finish(self) -> Result<String> {
        let file = self
            .out
            .into_inner()
            .map_err(|e| DfsError::storage(format!("flushing block {}", self.name), e.into_error()))?;
        file.sync_all()
            .map_err(|e| DfsError::storage(format!("syncing block {}", self.name), e))?;

        Ok(self.name)
    }
}
