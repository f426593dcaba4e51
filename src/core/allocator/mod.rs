//! Block allocation for the VMGS container
//!
//! Streams occupy contiguous [`Extent`]s of whole blocks. Free/used state
//! lives only in memory: on open it is rebuilt from the header and file
//! table by [`check_consistency`], so the on-disk format never carries a
//! bitmap that could disagree with the table.

pub mod bitmap;

use crate::error::{Result, VmgsError};
use serde::{Deserialize, Serialize};

pub use bitmap::BitmapAllocator;

/// A contiguous range of blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent {
    /// First block index
    pub start: u64,
    /// Number of blocks
    pub count: u64,
}

impl Extent {
    /// The extent of a zero-length stream
    pub const EMPTY: Extent = Extent { start: 0, count: 0 };

    pub fn new(start: u64, count: u64) -> Self {
        Extent { start, count }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// One past the last block
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.count)
    }

    pub fn contains(&self, block_id: u64) -> bool {
        block_id >= self.start && block_id < self.end()
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start < other.end()
            && other.start < self.end()
    }

    /// Block indices in chain order
    pub fn blocks(&self) -> std::ops::Range<u64> {
        self.start..self.end()
    }

    /// Bytes the extent can hold
    pub fn byte_capacity(&self, block_size: u32) -> u64 {
        self.count.saturating_mul(block_size as u64)
    }
}

/// Number of whole blocks needed to hold `bytes`
pub fn blocks_for(bytes: u64, block_size: u32) -> u64 {
    bytes.div_ceil(block_size as u64)
}

/// Block allocator trait
///
/// Defines the interface for allocating and freeing blocks in the container.
pub trait BlockAllocator {
    /// Allocate an extent large enough for `size` bytes
    fn allocate(&mut self, size: u64) -> Result<Extent>;

    /// Free a previously allocated extent (content is not zeroed)
    fn free(&mut self, extent: &Extent) -> Result<()>;

    /// Calculate fragmentation score (0.0 = no fragmentation, higher = more fragmented)
    fn fragmentation_score(&self) -> f64;

    /// Get total number of blocks managed
    fn total_blocks(&self) -> u64;

    /// Get number of free blocks available
    fn free_blocks(&self) -> u64;
}

/// Rebuild allocator state from every extent claimed on disk
///
/// `claims` pairs a human-readable owner ("header", "file table", or a
/// stream name) with its extent. Overlapping or out-of-range claims are
/// fatal: two owners of one block would make reads undefined.
pub fn check_consistency<'a, I>(
    total_blocks: u64,
    block_size: u32,
    claims: I,
) -> Result<BitmapAllocator>
where
    I: IntoIterator<Item = (&'a str, Extent)>,
{
    let mut allocator = BitmapAllocator::new(total_blocks, block_size);
    let mut owners: Vec<(&'a str, Extent)> = Vec::new();

    for (owner, extent) in claims {
        if extent.is_empty() {
            continue;
        }
        if extent.end() > total_blocks || extent.start.checked_add(extent.count).is_none() {
            return Err(VmgsError::CorruptContainer(format!(
                "{} extent {}..{} outside container of {} blocks",
                owner,
                extent.start,
                extent.end(),
                total_blocks
            )));
        }
        if let Some((other, _)) = owners.iter().find(|(_, e)| e.overlaps(&extent)) {
            return Err(VmgsError::CorruptContainer(format!(
                "{} and {} claim overlapping blocks",
                other, owner
            )));
        }
        allocator.mark_used(&extent)?;
        owners.push((owner, extent));
    }

    Ok(allocator)
}
