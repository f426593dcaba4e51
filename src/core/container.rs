//! VMGS container engine
//!
//! A [`Container`] owns one image on a [`Storage`] backend. The leading
//! blocks hold the two header copies; every other block belongs to the file
//! table, to exactly one stream, or to nobody.
//!
//! Updates are copy-on-write. New data and a new file table always go into
//! freshly allocated blocks, and a header copy is written last to point at
//! them. The header lands in the slot that is not current, so until it is
//! fully written the previous header still describes a complete,
//! consistent container.

use crate::allocator::{blocks_for, check_consistency, BitmapAllocator, BlockAllocator, Extent};
use crate::config::ContainerConfig;
use crate::envelope::{self, Envelope};
use crate::error::{Result, VmgsError};
use crate::file_table::{FileTable, FileTableEntry, StreamFlags, MAX_STREAMS};
use crate::header::{self, Header, HEADER_REGION_SIZE, HEADER_SLOTS, MIN_BLOCKS};
use crate::io::Storage;
use crate::span::ByteSpan;
use crate::validation::validate_stream_name;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Auto-growth multiplier
const GROW_FACTOR: u64 = 2;

/// A container shared between threads; each lock covers one whole operation
pub type SharedContainer<S> = Arc<Mutex<Container<S>>>;

/// Public view of one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: String,
    pub byte_length: u64,
    pub extent: Extent,
    pub flags: StreamFlags,
}

impl From<&FileTableEntry> for StreamInfo {
    fn from(entry: &FileTableEntry) -> Self {
        StreamInfo {
            name: entry.name.clone(),
            byte_length: entry.byte_length,
            extent: entry.extent,
            flags: entry.flags,
        }
    }
}

/// Container statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub block_size: u32,
    pub total_blocks: u64,
    pub used_blocks: u64,
    pub free_blocks: u64,
    pub stream_count: usize,
    pub generation: u64,
    pub fragmentation: f64,
}

/// Result of [`Container::verify`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub generation: u64,
    pub stream_count: usize,
    /// Blocks claimed by the header, the file table and streams
    pub used_blocks: u64,
    /// Blocks marked used in memory that nothing on disk claims
    pub leaked_blocks: Vec<u64>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.leaked_blocks.is_empty()
    }
}

/// State read back from storage
struct Loaded {
    header: Header,
    active_slot: usize,
    table: FileTable,
    allocator: BitmapAllocator,
}

/// An open VMGS container
#[derive(Debug)]
pub struct Container<S: Storage> {
    storage: S,
    /// Last committed header
    header: Header,
    /// Header slot holding `header`
    active_slot: usize,
    /// Last committed file table
    table: FileTable,
    /// Current block state, including growth not yet committed
    allocator: BitmapAllocator,
    config: ContainerConfig,
}

impl<S: Storage> Container<S> {
    /// Initialise an empty container on `storage`
    ///
    /// Existing content is overwritten. The new container holds an empty
    /// file table at generation 1.
    pub fn format(mut storage: S, config: ContainerConfig) -> Result<Self> {
        config.validate()?;

        let block_size = config.block_size;
        let total_blocks = config.initial_blocks;

        info!(
            "Formatting VMGS container: {} blocks of {} bytes",
            total_blocks, block_size
        );

        let header_extent = header::header_extent(block_size);
        storage.set_len(total_blocks * block_size as u64)?;
        storage.write_at(
            0,
            &vec![0u8; header_extent.byte_capacity(block_size) as usize],
        )?;

        let mut allocator = BitmapAllocator::new(total_blocks, block_size);
        allocator.mark_used(&header_extent)?;

        // The first commit lands in slot 0
        let mut container = Container {
            storage,
            header: Header::new(block_size, total_blocks),
            active_slot: HEADER_SLOTS - 1,
            table: FileTable::new(),
            allocator,
            config,
        };
        container.commit(FileTable::new())?;

        Ok(container)
    }

    /// Open an existing container with default settings
    pub fn open(storage: S) -> Result<Self> {
        Self::open_with(storage, ContainerConfig::default())
    }

    /// Open an existing container
    ///
    /// Only the growth settings of `config` apply; the geometry comes from
    /// the header.
    pub fn open_with(mut storage: S, config: ContainerConfig) -> Result<Self> {
        if config.auto_grow {
            config.validate()?;
        }

        let Loaded {
            header,
            active_slot,
            table,
            allocator,
        } = Self::load(&mut storage)?;

        info!(
            "Opened VMGS container: {} streams, {} blocks, generation {}",
            table.len(),
            header.total_blocks,
            header.generation
        );

        Ok(Container {
            storage,
            header,
            active_slot,
            table,
            allocator,
            config,
        })
    }

    /// Read and cross-check header, file table and block claims
    fn load(storage: &mut S) -> Result<Loaded> {
        let len = storage.len()?;
        if len < HEADER_REGION_SIZE as u64 {
            return Err(VmgsError::CorruptContainer(format!(
                "image of {} bytes is smaller than the header region",
                len
            )));
        }

        let mut raw = [0u8; HEADER_REGION_SIZE];
        storage.read_at(0, &mut raw)?;
        let (active_slot, header) = header::decode_active(&raw)?;

        if len < header.container_bytes() {
            return Err(VmgsError::CorruptContainer(format!(
                "image truncated: {} bytes, header describes {}",
                len,
                header.container_bytes()
            )));
        }

        let mut raw_table = vec![0u8; header.file_table_size as usize];
        storage.read_at(
            header.file_table.start * header.block_size as u64,
            &mut raw_table,
        )?;
        let (table, footer) =
            FileTable::decode(&raw_table, header.block_size).map_err(|e| match e {
                VmgsError::ChecksumMismatch { .. } | VmgsError::CorruptContainer(_) => e,
                other => VmgsError::CorruptContainer(format!("file table: {}", other)),
            })?;

        if footer.generation != header.generation {
            return Err(VmgsError::CorruptContainer(format!(
                "file table generation {} does not match header generation {}",
                footer.generation, header.generation
            )));
        }

        let claims = [
            ("header", header::header_extent(header.block_size)),
            ("file table", header.file_table),
        ]
        .into_iter()
        .chain(table.iter().map(|e| (e.name.as_str(), e.extent)));
        let allocator = check_consistency(header.total_blocks, header.block_size, claims)?;

        Ok(Loaded {
            header,
            active_slot,
            table,
            allocator,
        })
    }

    /// Read a whole stream
    pub fn read_stream(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .table
            .get(name)
            .ok_or_else(|| VmgsError::StreamNotFound(name.to_string()))?;
        let (extent, byte_length) = (entry.extent, entry.byte_length);

        debug!("Reading stream {} ({} bytes)", name, byte_length);

        if extent.is_empty() {
            return Ok(Vec::new());
        }

        let offset = self.offset_of(extent.start);
        let mut data = vec![0u8; extent.byte_capacity(self.block_size()) as usize];
        self.storage.read_at(offset, &mut data)?;
        data.truncate(byte_length as usize);
        Ok(data)
    }

    /// Create or replace a stream, keeping the flags of an existing one
    pub fn write_stream(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let flags = self
            .table
            .get(name)
            .map(|e| e.flags)
            .unwrap_or(StreamFlags::NONE);
        self.write_stream_with_flags(name, data, flags)
    }

    /// Create or replace a stream with explicit flags
    ///
    /// The old content stays readable on disk until the new header is
    /// written. On error the container is unchanged and stays usable.
    pub fn write_stream_with_flags(
        &mut self,
        name: &str,
        data: &[u8],
        flags: StreamFlags,
    ) -> Result<()> {
        validate_stream_name(name)?;

        let previous = self.table.get(name).map(|e| e.extent);
        if previous.is_none() && self.table.len() >= MAX_STREAMS {
            return Err(VmgsError::TableFull(MAX_STREAMS));
        }

        debug!("Writing {} bytes to stream {}", data.len(), name);

        let extent = self.allocate(data.len() as u64)?;
        if let Err(e) = self.write_extent(&extent, data) {
            self.release(&extent);
            return Err(e);
        }

        let mut table = self.table.clone();
        table.upsert(FileTableEntry::new(name, extent, data.len() as u64, flags));
        if let Err(e) = self.commit(table) {
            self.release(&extent);
            return Err(e);
        }

        if let Some(old) = previous {
            self.release(&old);
        }
        Ok(())
    }

    /// Remove a stream and release its blocks
    pub fn delete_stream(&mut self, name: &str) -> Result<()> {
        let mut table = self.table.clone();
        let entry = table
            .remove(name)
            .ok_or_else(|| VmgsError::StreamNotFound(name.to_string()))?;

        debug!("Deleting stream {}", name);

        self.commit(table)?;
        self.release(&entry.extent);
        Ok(())
    }

    /// Decode a stream as a key-value envelope
    pub fn read_envelope(&mut self, name: &str) -> Result<Envelope> {
        envelope::decode(&self.read_stream(name)?)
    }

    /// Encode a key-value envelope into a stream
    pub fn write_envelope(&mut self, name: &str, value: &Envelope) -> Result<()> {
        let bytes = envelope::encode(value)?;
        self.write_stream(name, &bytes)
    }

    /// Change the container size
    ///
    /// Shrinking refuses to drop a block in use. The file table is moved
    /// below the new end first when it sits past it.
    pub fn resize(&mut self, new_total_blocks: u64) -> Result<()> {
        if new_total_blocks < MIN_BLOCKS {
            return Err(VmgsError::InvalidConfig(format!(
                "container needs at least {} blocks, got {}",
                MIN_BLOCKS, new_total_blocks
            )));
        }

        let current = self.allocator.total_blocks();
        if new_total_blocks == current {
            return Ok(());
        }

        info!("Resizing container: {} -> {} blocks", current, new_total_blocks);

        if new_total_blocks > current {
            self.extend_to(new_total_blocks)?;
            return self.commit(self.table.clone());
        }

        if let Some(highest) = self
            .table
            .iter()
            .filter(|e| !e.extent.is_empty())
            .map(|e| e.extent.end() - 1)
            .max()
        {
            if highest >= new_total_blocks {
                return Err(VmgsError::ShrinkBelowAllocated {
                    requested: new_total_blocks,
                    highest_used: highest,
                });
            }
        }

        if self.header.file_table.end() > new_total_blocks {
            self.commit(self.table.clone())?;
        }

        self.allocator.shrink_capacity(new_total_blocks)?;
        if let Err(e) = self.commit(self.table.clone()) {
            self.allocator.extend_capacity(current);
            return Err(e);
        }

        // The committed header already describes the smaller container
        self.storage.set_len(self.header.container_bytes())?;
        Ok(())
    }

    /// Cross-check the on-disk state against this handle
    pub fn verify(&mut self) -> Result<VerifyReport> {
        let loaded = Self::load(&mut self.storage)?;

        if loaded.header != self.header || loaded.active_slot != self.active_slot {
            return Err(VmgsError::CorruptContainer(
                "on-disk header differs from the open container".to_string(),
            ));
        }
        if loaded.table != self.table {
            return Err(VmgsError::CorruptContainer(
                "on-disk file table differs from the open container".to_string(),
            ));
        }

        let leaked_blocks: Vec<u64> = self
            .allocator
            .allocated_blocks()
            .filter(|&b| !loaded.allocator.is_allocated(b))
            .collect();
        if !leaked_blocks.is_empty() {
            warn!(
                "{} leaked blocks found during verify (first: {})",
                leaked_blocks.len(),
                leaked_blocks[0]
            );
        }

        let on_disk = &loaded.allocator;
        Ok(VerifyReport {
            generation: loaded.header.generation,
            stream_count: loaded.table.len(),
            used_blocks: on_disk.total_blocks() - on_disk.free_blocks(),
            leaked_blocks,
        })
    }

    /// All streams in table order
    pub fn streams(&self) -> Vec<StreamInfo> {
        self.table.iter().map(StreamInfo::from).collect()
    }

    pub fn stream_info(&self, name: &str) -> Result<StreamInfo> {
        self.table
            .get(name)
            .map(StreamInfo::from)
            .ok_or_else(|| VmgsError::StreamNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains(name)
    }

    pub fn stats(&self) -> ContainerStats {
        let total_blocks = self.allocator.total_blocks();
        let free_blocks = self.allocator.free_blocks();
        ContainerStats {
            block_size: self.block_size(),
            total_blocks,
            used_blocks: total_blocks - free_blocks,
            free_blocks,
            stream_count: self.table.len(),
            generation: self.header.generation,
            fragmentation: self.allocator.fragmentation_score(),
        }
    }

    /// Last committed header
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn generation(&self) -> u64 {
        self.header.generation
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Sync and release the storage
    pub fn close(mut self) -> Result<S> {
        self.storage.sync()?;
        info!("Closed VMGS container at generation {}", self.header.generation);
        Ok(self.storage)
    }

    /// Wrap the container for use from several threads
    pub fn into_shared(self) -> SharedContainer<S> {
        Arc::new(Mutex::new(self))
    }

    /// Write a new file table and point the inactive header slot at it
    ///
    /// On success the old table blocks are released, `table` becomes the
    /// committed table and the written slot becomes current. On failure
    /// nothing in memory changes.
    fn commit(&mut self, table: FileTable) -> Result<()> {
        let generation = self.header.generation.checked_add(1).ok_or_else(|| {
            VmgsError::CorruptContainer("generation counter exhausted".to_string())
        })?;
        let bytes = table.encode(generation)?;
        let table_extent = self.allocate(bytes.len() as u64)?;

        let mut header = self.header;
        header.total_blocks = self.allocator.total_blocks();
        header.file_table = table_extent;
        header.file_table_size = bytes.len() as u32;
        header.generation = generation;

        let slot = (self.active_slot + 1) % HEADER_SLOTS;
        if let Err(e) = self.persist(&table_extent, &bytes, &header, slot) {
            self.release(&table_extent);
            return Err(e);
        }

        let old_table = self.header.file_table;
        self.header = header;
        self.active_slot = slot;
        self.table = table;
        self.release(&old_table);

        debug!("Committed generation {} to header slot {}", generation, slot);
        Ok(())
    }

    fn persist(
        &mut self,
        table_extent: &Extent,
        table: &[u8],
        header: &Header,
        slot: usize,
    ) -> Result<()> {
        self.write_extent(table_extent, table)?;
        self.storage.sync()?;
        self.storage
            .write_at(header::slot_offset(slot), &header.encode()?)?;
        self.storage.sync()
    }

    /// Allocate blocks for `bytes`, growing the container when allowed
    fn allocate(&mut self, bytes: u64) -> Result<Extent> {
        let blocks = blocks_for(bytes, self.block_size());
        loop {
            match self.allocator.allocate_blocks(blocks) {
                Err(VmgsError::OutOfSpace { .. }) if self.can_grow() => self.grow(blocks)?,
                result => return result,
            }
        }
    }

    fn can_grow(&self) -> bool {
        self.config.auto_grow && self.allocator.total_blocks() < self.config.max_blocks
    }

    /// Double the container (at least by `min_blocks`), capped at max_blocks
    ///
    /// The new size reaches the header with the next commit.
    fn grow(&mut self, min_blocks: u64) -> Result<()> {
        let current = self.allocator.total_blocks();
        let new_total = current
            .saturating_mul(GROW_FACTOR)
            .max(current.saturating_add(min_blocks))
            .min(self.config.max_blocks);

        info!("Growing container: {} -> {} blocks", current, new_total);
        self.extend_to(new_total)
    }

    fn extend_to(&mut self, new_total: u64) -> Result<()> {
        let bytes = new_total
            .checked_mul(self.block_size() as u64)
            .ok_or_else(|| {
                VmgsError::InvalidConfig(format!("{} blocks overflow the image size", new_total))
            })?;
        self.storage.set_len(bytes)?;
        self.allocator.extend_capacity(new_total);
        Ok(())
    }

    /// Write `data` to `extent`, zero padding the last block
    fn write_extent(&mut self, extent: &Extent, data: &[u8]) -> Result<()> {
        if extent.is_empty() {
            return Ok(());
        }
        let block_size = self.block_size() as usize;
        let mut span = ByteSpan::new(vec![0u8; extent.byte_capacity(self.block_size()) as usize]);
        span.write_bytes(data)?;
        span.pad_to(block_size)?;
        let offset = self.offset_of(extent.start);
        self.storage.write_at(offset, span.as_slice())
    }

    fn release(&mut self, extent: &Extent) {
        if let Err(e) = self.allocator.free_extent(extent) {
            warn!("Failed to release blocks {:?}: {}", extent, e);
        }
    }

    fn offset_of(&self, block: u64) -> u64 {
        block * self.block_size() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryStorage;

    fn small_config() -> ContainerConfig {
        ContainerConfig {
            block_size: 512,
            initial_blocks: 16,
            auto_grow: false,
            max_blocks: 64,
        }
    }

    fn fresh() -> Container<MemoryStorage> {
        Container::format(MemoryStorage::new(), small_config()).unwrap()
    }

    fn reopen(container: Container<MemoryStorage>) -> Container<MemoryStorage> {
        let storage = container.close().unwrap();
        Container::open_with(storage, small_config()).unwrap()
    }

    #[test]
    fn test_format_layout() {
        let container = fresh();
        assert_eq!(container.generation(), 1);
        assert_eq!(container.header().file_table, Extent::new(2, 1));
        assert_eq!(container.stats().used_blocks, 3);
        assert_eq!(container.storage().as_bytes().len(), 16 * 512);
        assert_eq!(&container.storage().as_bytes()[..8], b"GUESTRTS");
        // Second copy not written yet
        assert!(container.storage().as_bytes()[512..1024].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_commits_alternate_header_slots() {
        let mut container = fresh();
        container.write_stream("a", b"1").unwrap();
        let image = container.storage().as_bytes();
        let second = Header::decode(&image[512..576]).unwrap();
        assert_eq!(second.generation, 2);
        assert_eq!(Header::decode(&image[..64]).unwrap().generation, 1);

        container.write_stream("b", b"2").unwrap();
        let image = container.storage().as_bytes();
        assert_eq!(Header::decode(&image[..64]).unwrap().generation, 3);

        let mut container = reopen(container);
        assert_eq!(container.generation(), 3);
        assert_eq!(container.read_stream("a").unwrap(), b"1");
        assert!(container.verify().unwrap().is_clean());
    }

    #[test]
    fn test_generation_exhausted_is_an_error() {
        let mut container = fresh();
        container.write_stream("a", b"payload").unwrap();
        let mut image = container.close().unwrap().into_inner();

        // Reseal the current copy and its table at the last generation
        let (slot, mut current) = header::decode_active(&image[..HEADER_REGION_SIZE]).unwrap();
        current.generation = u64::MAX;
        let offset = header::slot_offset(slot) as usize;
        image[offset..offset + 64].copy_from_slice(&current.encode().unwrap());
        let other = header::slot_offset(1 - slot) as usize;
        image[other..other + 64].fill(0);

        let start = (current.file_table.start * 512) as usize;
        let end = start + current.file_table_size as usize;
        let (table, _) = FileTable::decode(&image[start..end], 512).unwrap();
        let encoded = table.encode(u64::MAX).unwrap();
        image[start..start + encoded.len()].copy_from_slice(&encoded);

        let mut container =
            Container::open_with(MemoryStorage::from_bytes(image), small_config()).unwrap();
        assert_eq!(container.generation(), u64::MAX);
        let free = container.stats().free_blocks;

        assert!(matches!(
            container.write_stream("b", b"more"),
            Err(VmgsError::CorruptContainer(_))
        ));

        // Handle stays usable and nothing leaked
        assert_eq!(container.generation(), u64::MAX);
        assert_eq!(container.stats().free_blocks, free);
        assert!(!container.contains("b"));
        assert_eq!(container.read_stream("a").unwrap(), b"payload");
        assert!(container.verify().unwrap().is_clean());
    }

    #[test]
    fn test_write_read_reopen() {
        let mut container = fresh();
        let data: Vec<u8> = (0..1300u32).map(|i| i as u8).collect();
        container.write_stream("tpm_nvram", &data).unwrap();
        assert_eq!(container.read_stream("tpm_nvram").unwrap(), data);

        let mut container = reopen(container);
        assert_eq!(container.read_stream("tpm_nvram").unwrap(), data);
        assert_eq!(container.stream_info("tpm_nvram").unwrap().extent.count, 3);
    }

    #[test]
    fn test_overwrite_frees_old_blocks() {
        let mut container = fresh();
        container.write_stream("a", &[1u8; 2000]).unwrap();
        let used = container.stats().used_blocks;

        container.write_stream("a", &[2u8; 10]).unwrap();
        assert_eq!(container.stats().used_blocks, used - 3);
        assert_eq!(container.read_stream("a").unwrap(), vec![2u8; 10]);
        assert!(container.verify().unwrap().is_clean());
    }

    #[test]
    fn test_generation_increments_per_commit() {
        let mut container = fresh();
        container.write_stream("a", b"1").unwrap();
        container.write_stream("b", b"2").unwrap();
        container.delete_stream("a").unwrap();
        assert_eq!(container.generation(), 4);
        assert!(!container.contains("a"));
        assert!(matches!(
            container.read_stream("a"),
            Err(VmgsError::StreamNotFound(_))
        ));
    }

    #[test]
    fn test_flags_kept_on_rewrite() {
        let mut container = fresh();
        container
            .write_stream_with_flags("key_protector", b"kp", StreamFlags::KEY_PROTECTOR)
            .unwrap();
        container.write_stream("key_protector", b"kp2").unwrap();
        let mut container = reopen(container);
        assert_eq!(
            container.stream_info("key_protector").unwrap().flags,
            StreamFlags::KEY_PROTECTOR
        );
        assert_eq!(container.read_stream("key_protector").unwrap(), b"kp2");
    }

    #[test]
    fn test_out_of_space_leaves_state_unchanged() {
        let mut container = fresh();
        container.write_stream("a", b"keep").unwrap();
        let generation = container.generation();
        let free = container.stats().free_blocks;

        let result = container.write_stream("big", &vec![0u8; 20 * 512]);
        assert!(matches!(result, Err(VmgsError::OutOfSpace { .. })));
        assert_eq!(container.generation(), generation);
        assert_eq!(container.stats().free_blocks, free);
        assert!(!container.contains("big"));
        assert_eq!(container.read_stream("a").unwrap(), b"keep");
    }

    #[test]
    fn test_auto_grow_then_reopen() {
        let mut config = small_config();
        config.auto_grow = true;
        let mut container = Container::format(MemoryStorage::new(), config.clone()).unwrap();

        let data = vec![0x5Au8; 40 * 512];
        container.write_stream("big", &data).unwrap();
        assert!(container.header().total_blocks > 16);
        assert!(container.header().total_blocks <= 64);

        let storage = container.close().unwrap();
        let mut container = Container::open_with(storage, config).unwrap();
        assert_eq!(container.read_stream("big").unwrap(), data);
    }

    #[test]
    fn test_auto_grow_respects_max_blocks() {
        let mut config = small_config();
        config.auto_grow = true;
        let mut container = Container::format(MemoryStorage::new(), config).unwrap();
        assert!(matches!(
            container.write_stream("huge", &vec![0u8; 100 * 512]),
            Err(VmgsError::OutOfSpace { .. })
        ));
    }

    #[test]
    fn test_verify_reports_leaked_blocks() {
        let mut container = fresh();
        container.write_stream("a", b"data").unwrap();
        assert!(container.verify().unwrap().is_clean());

        let leaked = container.allocator.allocate_blocks(2).unwrap();
        let report = container.verify().unwrap();
        assert_eq!(report.leaked_blocks, leaked.blocks().collect::<Vec<_>>());
        assert_eq!(report.stream_count, 1);
    }

    #[test]
    fn test_leaks_do_not_survive_reopen() {
        let mut container = fresh();
        container.allocator.allocate_blocks(4).unwrap();
        let container = reopen(container);
        assert_eq!(container.stats().used_blocks, 3);
    }

    #[test]
    fn test_table_full() {
        let mut config = small_config();
        config.initial_blocks = 64;
        let mut container = Container::format(MemoryStorage::new(), config).unwrap();
        for i in 0..MAX_STREAMS {
            container.write_stream(&format!("s{}", i), b"").unwrap();
        }
        assert!(matches!(
            container.write_stream("one-more", b"x"),
            Err(VmgsError::TableFull(MAX_STREAMS))
        ));
        // Existing streams can still be replaced
        container.write_stream("s0", b"x").unwrap();
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut container = fresh();
        assert!(matches!(
            container.write_stream("", b"x"),
            Err(VmgsError::InvalidStreamName(_))
        ));
        assert_eq!(container.generation(), 1);
    }

    #[test]
    fn test_envelope_helpers() {
        let mut container = fresh();
        let mut value = Envelope::new();
        value.insert("vm".into(), serde_json::json!("guest"));
        container.write_envelope("attest", &value).unwrap();
        assert_eq!(container.read_envelope("attest").unwrap(), value);
    }
}
