//! File table codec
//!
//! ```text
//! Offset          Size  Field
//!      0             4  entry count
//!      4             4  entry size (96)
//!      8        n * 96  entries
//!  8 + n*96         24  footer (see header::TableFooter)
//! ```
//!
//! Each entry:
//!
//! ```text
//!  0   1  name length
//!  1  63  name (UTF-8, zero padded)
//! 64   8  start block
//! 72   8  block count
//! 80   8  byte length
//! 88   4  flags
//! 92   4  reserved
//! ```

use crate::allocator::Extent;
use crate::error::{Result, VmgsError};
use crate::header::{TableFooter, FOOTER_SIZE};
use crate::span::ByteSpan;
use crate::validation::{validate_stream_name, MAX_NAME_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::{BitOr, BitOrAssign};

/// Maximum number of streams in one container
pub const MAX_STREAMS: usize = 64;

/// Serialized size of one entry
pub const ENTRY_SIZE: usize = 96;

const TABLE_PREFIX_SIZE: usize = 8;

/// Per-stream attribute bits
///
/// Bits without a named constant are kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StreamFlags(u32);

impl StreamFlags {
    pub const NONE: StreamFlags = StreamFlags(0);
    /// Stream holds key-protector material
    pub const KEY_PROTECTOR: StreamFlags = StreamFlags(1 << 0);
    /// Payload is encrypted by the caller
    pub const ENCRYPTED: StreamFlags = StreamFlags(1 << 1);
    /// Payload carries a caller-side authentication tag
    pub const AUTHENTICATED: StreamFlags = StreamFlags(1 << 2);

    pub const fn from_bits(bits: u32) -> Self {
        StreamFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: StreamFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: StreamFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for StreamFlags {
    type Output = StreamFlags;

    fn bitor(self, rhs: StreamFlags) -> StreamFlags {
        StreamFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for StreamFlags {
    fn bitor_assign(&mut self, rhs: StreamFlags) {
        self.0 |= rhs.0;
    }
}

/// One named stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTableEntry {
    pub name: String,
    pub extent: Extent,
    /// Payload length; the final block is zero padded past it
    pub byte_length: u64,
    pub flags: StreamFlags,
}

impl FileTableEntry {
    pub fn new(
        name: impl Into<String>,
        extent: Extent,
        byte_length: u64,
        flags: StreamFlags,
    ) -> Self {
        FileTableEntry {
            name: name.into(),
            extent,
            byte_length,
            flags,
        }
    }

    /// Check the length against the extent
    pub fn validate(&self, block_size: u32) -> Result<()> {
        if self.extent.is_empty() {
            if self.byte_length != 0 {
                return Err(VmgsError::CorruptContainer(format!(
                    "stream {} has {} bytes but no blocks",
                    self.name, self.byte_length
                )));
            }
            return Ok(());
        }
        if self.byte_length > self.extent.byte_capacity(block_size) {
            return Err(VmgsError::CorruptContainer(format!(
                "stream {} length {} exceeds its {} block extent",
                self.name, self.byte_length, self.extent.count
            )));
        }
        Ok(())
    }

    fn encode_into(&self, span: &mut ByteSpan<Vec<u8>>) -> Result<()> {
        let name = self.name.as_bytes();
        span.write_u8(name.len() as u8)?;
        span.write_bytes(name)?;
        span.zero_fill(MAX_NAME_LEN - name.len())?;
        span.write_u64(self.extent.start)?;
        span.write_u64(self.extent.count)?;
        span.write_u64(self.byte_length)?;
        span.write_u32(self.flags.bits())?;
        span.write_u32(0)?;
        Ok(())
    }

    fn decode_from(span: &mut ByteSpan<&[u8]>, index: usize) -> Result<Self> {
        let name_len = span.read_u8()? as usize;
        let raw_name = span.read_array::<MAX_NAME_LEN>()?;
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(VmgsError::CorruptContainer(format!(
                "entry {} has name length {}",
                index, name_len
            )));
        }
        if raw_name[name_len..].iter().any(|&b| b != 0) {
            return Err(VmgsError::CorruptContainer(format!(
                "entry {} name is not zero padded",
                index
            )));
        }
        let name = std::str::from_utf8(&raw_name[..name_len]).map_err(|_| {
            VmgsError::CorruptContainer(format!("entry {} name is not UTF-8", index))
        })?;
        validate_stream_name(name)
            .map_err(|e| VmgsError::CorruptContainer(format!("entry {}: {}", index, e)))?;

        let extent = Extent::new(span.read_u64()?, span.read_u64()?);
        let byte_length = span.read_u64()?;
        let flags = StreamFlags::from_bits(span.read_u32()?);
        span.read_u32()?;

        Ok(FileTableEntry::new(name, extent, byte_length, flags))
    }
}

/// Ordered set of stream entries
///
/// Entries keep their insertion order so an unmodified table re-encodes to
/// the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTable {
    entries: Vec<FileTableEntry>,
}

impl FileTable {
    pub fn new() -> Self {
        FileTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FileTableEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileTableEntry> {
        self.entries.iter()
    }

    /// Replace the entry with the same name in place, or append
    ///
    /// Returns the replaced entry.
    pub fn upsert(&mut self, entry: FileTableEntry) -> Option<FileTableEntry> {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(slot) => Some(std::mem::replace(slot, entry)),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }

    /// Remove an entry, keeping the order of the others
    pub fn remove(&mut self, name: &str) -> Option<FileTableEntry> {
        let idx = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(idx))
    }

    /// Encoded length of a table with `entries` entries
    pub fn encoded_len(entries: usize) -> usize {
        TABLE_PREFIX_SIZE + entries * ENTRY_SIZE + FOOTER_SIZE
    }

    /// Serialize the table, closing it with a footer for `generation`
    pub fn encode(&self, generation: u64) -> Result<Vec<u8>> {
        if self.entries.len() > MAX_STREAMS {
            return Err(VmgsError::TableFull(MAX_STREAMS));
        }

        let mut seen = HashSet::new();
        for entry in &self.entries {
            validate_stream_name(&entry.name)?;
            if !seen.insert(entry.name.as_str()) {
                return Err(VmgsError::DuplicateStreamName(entry.name.clone()));
            }
        }

        let mut span = ByteSpan::new(vec![0u8; Self::encoded_len(self.entries.len())]);
        span.write_u32(self.entries.len() as u32)?;
        span.write_u32(ENTRY_SIZE as u32)?;
        for entry in &self.entries {
            entry.encode_into(&mut span)?;
        }
        TableFooter { generation }.encode_into(&mut span)?;

        Ok(span.into_inner())
    }

    /// Parse a table and its footer
    ///
    /// The footer checksum is verified before any entry is interpreted.
    /// Bytes past the footer are ignored.
    pub fn decode(bytes: &[u8], block_size: u32) -> Result<(Self, TableFooter)> {
        let mut span = ByteSpan::new(bytes);
        let count = span.read_u32()? as usize;
        let entry_size = span.read_u32()? as usize;

        if entry_size != ENTRY_SIZE {
            return Err(VmgsError::CorruptContainer(format!(
                "file table entry size {}, expected {}",
                entry_size, ENTRY_SIZE
            )));
        }
        if count > MAX_STREAMS {
            return Err(VmgsError::CorruptContainer(format!(
                "file table overflow: {} entries (max {})",
                count, MAX_STREAMS
            )));
        }
        if Self::encoded_len(count) > bytes.len() {
            return Err(VmgsError::CorruptContainer(format!(
                "file table of {} entries needs {} bytes, only {} present",
                count,
                Self::encoded_len(count),
                bytes.len()
            )));
        }

        span.seek(TABLE_PREFIX_SIZE + count * ENTRY_SIZE)?;
        let footer = TableFooter::decode_from(&mut span)?;

        span.seek(TABLE_PREFIX_SIZE)?;
        let mut table = FileTable::new();
        for index in 0..count {
            let entry = FileTableEntry::decode_from(&mut span, index)?;
            if table.contains(&entry.name) {
                return Err(VmgsError::DuplicateStreamName(entry.name));
            }
            entry.validate(block_size)?;
            table.entries.push(entry);
        }

        Ok((table, footer))
    }
}

impl<'a> IntoIterator for &'a FileTable {
    type Item = &'a FileTableEntry;
    type IntoIter = std::slice::Iter<'a, FileTableEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
