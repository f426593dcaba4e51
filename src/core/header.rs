//! VMGS header and file-table footer codecs
//!
//! ```text
//! Offset  Size  Field
//!      0     8  magic "GUESTRTS"
//!      8     4  version (major << 16 | minor)
//!     12     4  header size (64)
//!     16     4  block size
//!     20     4  file table size in bytes
//!     24     8  total blocks
//!     32     8  file table start block
//!     40     8  file table block count
//!     48     8  generation
//!     56     4  reserved
//!     60     4  CRC-32 of bytes 0..60
//! ```
//!
//! The header is the commit point of the container: it is always the last
//! thing written by a mutating operation.
//!
//! Two copies live in the first two 512-byte sectors of the image. Each
//! commit writes the copy that is not current, so a torn header write
//! leaves the other copy intact:
//!
//! ```text
//! Byte offset    0  slot 0
//! Byte offset  512  slot 1
//! ```
//!
//! The current copy is the valid one with the higher generation; when both
//! are valid their generations must be consecutive.

use crate::allocator::{blocks_for, Extent};
use crate::error::{ChecksumRegion, Result, VmgsError};
use crate::span::ByteSpan;
use tracing::warn;

pub const MAGIC: [u8; 8] = *b"GUESTRTS";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
pub const FORMAT_VERSION: u32 = ((VERSION_MAJOR as u32) << 16) | VERSION_MINOR as u32;

/// Serialized header length
pub const HEADER_SIZE: usize = 64;
const CHECKSUM_OFFSET: usize = HEADER_SIZE - 4;

pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
pub const MIN_BLOCK_SIZE: u32 = 512;
pub const MAX_BLOCK_SIZE: u32 = 65536;

/// Space owned by one header copy
pub const HEADER_SLOT_SIZE: usize = 512;
pub const HEADER_SLOTS: usize = 2;

/// Leading bytes of the image reserved for the header copies
pub const HEADER_REGION_SIZE: usize = HEADER_SLOT_SIZE * HEADER_SLOTS;

/// Header blocks plus at least one file table block at the smallest block size
pub const MIN_BLOCKS: u64 = 3;

/// End-marker that closes the file table
pub const FOOTER_MAGIC: [u8; 8] = *b"VMGSFTBL";
pub const FOOTER_SIZE: usize = 24;

/// Check that a block size is a power of two within the supported range
pub fn validate_block_size(block_size: u32) -> Result<()> {
    if !block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
        return Err(VmgsError::InvalidBlockSize(block_size));
    }
    Ok(())
}

/// Blocks covered by the header copies
pub fn header_blocks(block_size: u32) -> u64 {
    blocks_for(HEADER_REGION_SIZE as u64, block_size)
}

/// Extent owned by the header copies
pub fn header_extent(block_size: u32) -> Extent {
    Extent::new(0, header_blocks(block_size))
}

/// Byte offset of a header copy
pub fn slot_offset(slot: usize) -> u64 {
    (slot * HEADER_SLOT_SIZE) as u64
}

/// Decode both header copies and pick the current one
///
/// Returns the slot index with its header. A damaged copy is skipped with a
/// warning, so a torn header write falls back to the previous generation.
/// A copy written by a newer format version is never skipped.
pub fn decode_active(region: &[u8]) -> Result<(usize, Header)> {
    if region.len() < HEADER_REGION_SIZE {
        return Err(VmgsError::CorruptContainer(format!(
            "header region is {} bytes, expected {}",
            region.len(),
            HEADER_REGION_SIZE
        )));
    }

    let slots = [0, 1].map(|slot| {
        let start = slot * HEADER_SLOT_SIZE;
        Header::decode(&region[start..start + HEADER_SIZE])
    });

    for slot in &slots {
        if let Err(VmgsError::UnsupportedVersion { major, minor }) = slot {
            return Err(VmgsError::UnsupportedVersion {
                major: *major,
                minor: *minor,
            });
        }
    }

    match slots {
        [Ok(first), Ok(second)] => {
            if first.generation.checked_add(1) == Some(second.generation) {
                Ok((1, second))
            } else if second.generation.checked_add(1) == Some(first.generation) {
                Ok((0, first))
            } else {
                Err(VmgsError::CorruptContainer(format!(
                    "header generations {} and {} are not consecutive",
                    first.generation, second.generation
                )))
            }
        }
        [Ok(first), Err(e)] => {
            warn!("Header slot 1 unusable, using slot 0: {}", e);
            Ok((0, first))
        }
        [Err(e), Ok(second)] => {
            warn!("Header slot 0 unusable, using slot 1: {}", e);
            Ok((1, second))
        }
        // Prefer the error that says more than "bad checksum"
        [Err(VmgsError::ChecksumMismatch { .. }), Err(second)] => Err(second),
        [Err(first), Err(_)] => Err(first),
    }
}

/// Container superblock
///
/// Carries no checksum field: [`Header::encode`] always computes it from
/// the other fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version (major << 16 | minor)
    pub version: u32,

    /// Block size in bytes
    pub block_size: u32,

    /// Committed container size in blocks
    pub total_blocks: u64,

    /// Blocks holding the file table
    pub file_table: Extent,

    /// Encoded file table length in bytes (entries + footer)
    pub file_table_size: u32,

    /// Incremented by every successful commit
    pub generation: u64,
}

impl Header {
    pub fn new(block_size: u32, total_blocks: u64) -> Self {
        Header {
            version: FORMAT_VERSION,
            block_size,
            total_blocks,
            file_table: Extent::EMPTY,
            file_table_size: 0,
            generation: 0,
        }
    }

    /// Committed container size in bytes
    pub fn container_bytes(&self) -> u64 {
        self.total_blocks.saturating_mul(self.block_size as u64)
    }

    /// Validate version, block size and structural pointers
    pub fn validate(&self) -> Result<()> {
        self.validate_version()?;
        validate_block_size(self.block_size)?;

        if self.total_blocks < MIN_BLOCKS {
            return Err(VmgsError::CorruptContainer(format!(
                "container of {} blocks is smaller than the minimum of {}",
                self.total_blocks, MIN_BLOCKS
            )));
        }

        if self.file_table.is_empty()
            || self.file_table.start < header_blocks(self.block_size)
            || self.file_table.end() > self.total_blocks
        {
            return Err(VmgsError::CorruptContainer(format!(
                "file table extent {}..{} invalid for {} blocks",
                self.file_table.start,
                self.file_table.end(),
                self.total_blocks
            )));
        }

        if self.file_table_size as u64 > self.file_table.byte_capacity(self.block_size) {
            return Err(VmgsError::CorruptContainer(format!(
                "file table size {} exceeds its {} block extent",
                self.file_table_size, self.file_table.count
            )));
        }

        Ok(())
    }

    /// Serialize to [`HEADER_SIZE`] bytes with a freshly computed checksum
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut span = ByteSpan::new(vec![0u8; HEADER_SIZE]);

        span.write_bytes(&MAGIC)?;
        span.write_u32(self.version)?;
        span.write_u32(HEADER_SIZE as u32)?;
        span.write_u32(self.block_size)?;
        span.write_u32(self.file_table_size)?;
        span.write_u64(self.total_blocks)?;
        span.write_u64(self.file_table.start)?;
        span.write_u64(self.file_table.count)?;
        span.write_u64(self.generation)?;
        span.write_u32(0)?;

        let checksum = crc32fast::hash(&span.as_slice()[..CHECKSUM_OFFSET]);
        span.write_u32(checksum)?;

        Ok(span.into_inner())
    }

    /// Parse and validate a header
    ///
    /// The checksum is verified before anything else: when it fails, none
    /// of the fields (the magic included) can be trusted.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut span = ByteSpan::new(bytes);

        span.seek(CHECKSUM_OFFSET)?;
        let stored = span.read_u32()?;
        let computed = crc32fast::hash(&bytes[..CHECKSUM_OFFSET]);
        if stored != computed {
            return Err(VmgsError::ChecksumMismatch {
                region: ChecksumRegion::Header,
                expected: stored,
                actual: computed,
            });
        }

        span.seek(0)?;
        if span.read_array::<8>()? != MAGIC {
            return Err(VmgsError::InvalidMagic);
        }

        let version = span.read_u32()?;
        let header_size = span.read_u32()?;
        let block_size = span.read_u32()?;
        let file_table_size = span.read_u32()?;
        let total_blocks = span.read_u64()?;
        let file_table = Extent::new(span.read_u64()?, span.read_u64()?);
        let generation = span.read_u64()?;

        let header = Header {
            version,
            block_size,
            total_blocks,
            file_table,
            file_table_size,
            generation,
        };

        // Version first so a newer layout reports itself as such
        header.validate_version()?;
        if header_size as usize != HEADER_SIZE {
            return Err(VmgsError::CorruptContainer(format!(
                "unexpected header size {}, expected {}",
                header_size, HEADER_SIZE
            )));
        }
        header.validate()?;

        Ok(header)
    }

    fn validate_version(&self) -> Result<()> {
        let major = (self.version >> 16) as u16;
        if major != VERSION_MAJOR || self.version > FORMAT_VERSION {
            return Err(VmgsError::UnsupportedVersion {
                major,
                minor: self.version as u16,
            });
        }
        Ok(())
    }
}

/// Trailer closing the file table
///
/// Ties the table to the header generation that committed it and carries
/// the table checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFooter {
    pub generation: u64,
}

impl TableFooter {
    /// Append the footer to `span`, checksumming every byte before the CRC
    pub fn encode_into(&self, span: &mut ByteSpan<Vec<u8>>) -> Result<()> {
        span.write_bytes(&FOOTER_MAGIC)?;
        span.write_u64(self.generation)?;
        let checksum_at = span.position();
        let checksum = crc32fast::hash(&span.as_slice()[..checksum_at]);
        span.write_u32(checksum)?;
        span.write_u32(0)?;
        Ok(())
    }

    /// Read the footer at the cursor of a span over the whole table
    pub fn decode_from(span: &mut ByteSpan<&[u8]>) -> Result<Self> {
        if span.read_array::<8>()? != FOOTER_MAGIC {
            return Err(VmgsError::CorruptContainer(
                "file table end marker missing".to_string(),
            ));
        }
        let generation = span.read_u64()?;
        let checksum_at = span.position();
        let stored = span.read_u32()?;
        let computed = crc32fast::hash(&span.as_slice()[..checksum_at]);
        if stored != computed {
            return Err(VmgsError::ChecksumMismatch {
                region: ChecksumRegion::FileTable,
                expected: stored,
                actual: computed,
            });
        }
        span.read_u32()?;
        Ok(TableFooter { generation })
    }
}
