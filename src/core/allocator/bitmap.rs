//! Bitmap allocator with first-fit contiguous allocation
//!
//! Each bit represents one block. Streams need contiguous extents, so
//! allocation scans for the first run of free bits long enough for the
//! request.

use crate::allocator::{blocks_for, BlockAllocator, Extent};
use crate::error::{Result, VmgsError};
use serde::{Deserialize, Serialize};

/// Bitmap allocator for container blocks
///
/// Represents free/allocated state with bits:
/// - 0 = free block
/// - 1 = allocated block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitmapAllocator {
    /// Bitmap words (each word = 64 bits = 64 blocks)
    bitmap: Vec<u64>,

    /// Total number of blocks tracked
    total_blocks: u64,

    /// Number of free blocks available
    free_blocks: u64,

    /// Bytes per block
    block_size: u32,
}

impl BitmapAllocator {
    /// Create a new bitmap allocator with every block free
    pub fn new(total_blocks: u64, block_size: u32) -> Self {
        let num_words = total_blocks.div_ceil(64) as usize;
        BitmapAllocator {
            bitmap: vec![0u64; num_words],
            total_blocks,
            free_blocks: total_blocks,
            block_size,
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Allocate `num_blocks` contiguous blocks (first fit)
    pub fn allocate_blocks(&mut self, num_blocks: u64) -> Result<Extent> {
        if num_blocks == 0 {
            return Ok(Extent::EMPTY);
        }
        if num_blocks > self.free_blocks {
            return Err(self.out_of_space(num_blocks));
        }

        let mut run_start = 0u64;
        let mut run_len = 0u64;
        let mut block_id = 0u64;

        while block_id < self.total_blocks {
            let word = self.bitmap[(block_id / 64) as usize];
            if block_id % 64 == 0 && word == u64::MAX {
                // All 64 blocks allocated, the run is broken
                run_len = 0;
                block_id += 64;
                continue;
            }

            if self.is_allocated(block_id) {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = block_id;
                }
                run_len += 1;
                if run_len == num_blocks {
                    let extent = Extent::new(run_start, num_blocks);
                    self.set_range(&extent, true);
                    self.free_blocks -= num_blocks;
                    return Ok(extent);
                }
            }
            block_id += 1;
        }

        Err(self.out_of_space(num_blocks))
    }

    /// Claim a specific extent
    ///
    /// Fails without modifying state if any block is out of range or
    /// already in use.
    pub fn mark_used(&mut self, extent: &Extent) -> Result<()> {
        if extent.end() > self.total_blocks {
            return Err(VmgsError::InvalidBlockId(extent.end() - 1));
        }
        if let Some(block_id) = extent.blocks().find(|&b| self.is_allocated(b)) {
            return Err(VmgsError::CorruptContainer(format!(
                "block {} claimed twice",
                block_id
            )));
        }
        self.set_range(extent, true);
        self.free_blocks -= extent.count;
        Ok(())
    }

    /// Free previously allocated blocks
    pub fn free_extent(&mut self, extent: &Extent) -> Result<()> {
        if extent.is_empty() {
            return Ok(());
        }
        if extent.end() > self.total_blocks {
            return Err(VmgsError::InvalidBlockId(extent.end() - 1));
        }

        for block_id in extent.blocks() {
            if !self.is_allocated(block_id) {
                // Already free - this is a double-free bug
                tracing::warn!("Double-free detected for block {}", block_id);
                continue;
            }
            self.set_bit(block_id, false);
            self.free_blocks += 1;
        }

        Ok(())
    }

    /// Check if a specific block is allocated
    pub fn is_allocated(&self, block_id: u64) -> bool {
        if block_id >= self.total_blocks {
            return false;
        }

        let word_idx = (block_id / 64) as usize;
        let bit_idx = block_id % 64;

        (self.bitmap[word_idx] & (1u64 << bit_idx)) != 0
    }

    /// Highest allocated block, if any
    pub fn highest_allocated(&self) -> Option<u64> {
        self.bitmap
            .iter()
            .enumerate()
            .rev()
            .find(|(_, &word)| word != 0)
            .map(|(idx, &word)| idx as u64 * 64 + (63 - word.leading_zeros() as u64))
    }

    /// Allocated blocks in ascending order
    pub fn allocated_blocks(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.total_blocks).filter(move |&b| self.is_allocated(b))
    }

    /// Extend bitmap capacity to track more blocks
    ///
    /// Used by resize and auto-growth. New blocks start free.
    pub fn extend_capacity(&mut self, new_total_blocks: u64) {
        if new_total_blocks <= self.total_blocks {
            return;
        }

        self.bitmap.resize(new_total_blocks.div_ceil(64) as usize, 0u64);

        let added_blocks = new_total_blocks - self.total_blocks;
        self.total_blocks = new_total_blocks;
        self.free_blocks += added_blocks;
    }

    /// Drop tracking for blocks at and beyond `new_total_blocks`
    ///
    /// Refuses if any of the dropped blocks is allocated.
    pub fn shrink_capacity(&mut self, new_total_blocks: u64) -> Result<()> {
        if new_total_blocks >= self.total_blocks {
            return Ok(());
        }
        if let Some(highest) = self.highest_allocated() {
            if highest >= new_total_blocks {
                return Err(VmgsError::ShrinkBelowAllocated {
                    requested: new_total_blocks,
                    highest_used: highest,
                });
            }
        }

        let removed = self.total_blocks - new_total_blocks;
        self.bitmap.truncate(new_total_blocks.div_ceil(64) as usize);
        self.total_blocks = new_total_blocks;
        self.free_blocks -= removed;
        Ok(())
    }

    fn set_range(&mut self, extent: &Extent, allocated: bool) {
        for block_id in extent.blocks() {
            self.set_bit(block_id, allocated);
        }
    }

    fn set_bit(&mut self, block_id: u64, allocated: bool) {
        let word_idx = (block_id / 64) as usize;
        let mask = 1u64 << (block_id % 64);
        if allocated {
            self.bitmap[word_idx] |= mask;
        } else {
            self.bitmap[word_idx] &= !mask;
        }
    }

    fn out_of_space(&self, needed: u64) -> VmgsError {
        VmgsError::OutOfSpace {
            needed,
            available: self.free_blocks,
        }
    }
}

impl BlockAllocator for BitmapAllocator {
    fn allocate(&mut self, size: u64) -> Result<Extent> {
        self.allocate_blocks(blocks_for(size, self.block_size))
    }

    fn free(&mut self, extent: &Extent) -> Result<()> {
        self.free_extent(extent)
    }

    fn fragmentation_score(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }

        // Count free<->allocated transitions across the tracked range
        let mut transitions = 0u64;
        let mut prev_allocated = false;

        for block_id in 0..self.total_blocks {
            let is_allocated = self.is_allocated(block_id);
            if is_allocated != prev_allocated {
                transitions += 1;
            }
            prev_allocated = is_allocated;
        }

        (transitions as f64) / (self.total_blocks as f64)
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn free_blocks(&self) -> u64 {
        self.free_blocks
    }
}
