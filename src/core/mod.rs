//! VMGS container format
//!
//! Building blocks of the container, leaves first:
//!
//! - [`span`] - Bounds-checked little-endian cursor used by every codec
//! - [`allocator`] - Block extents, the bitmap allocator and the
//!   consistency check that rebuilds it on open
//! - [`header`] - Header copies and file table footer codecs
//! - [`file_table`] - Stream entries and their on-disk table
//! - [`io`] - Storage backends (memory, file)
//! - [`container`] - The container engine: open, read, write, resize
//! - [`envelope`] - UTF-16LE JSON key-value payloads
//! - [`config`] - Container settings, loadable from TOML
//! - [`validation`] - Stream name rules and well-known names
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Bytes 0..1024: two header copies            │
//! │  - Magic "GUESTRTS", version 1.0            │
//! │  - Block size, total blocks                 │
//! │  - File table pointer, generation, CRC-32   │
//! ├─────────────────────────────────────────────┤
//! │ Next block on: File table and stream data   │
//! │  - Contiguous extents, any order            │
//! │  - Table ends with a generation-stamped,    │
//! │    checksummed footer                       │
//! ├─────────────────────────────────────────────┤
//! │ Free blocks                                 │
//! └─────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod config;
pub mod container;
pub mod envelope;
pub mod error;
pub mod file_table;
pub mod header;
pub mod io;
pub mod span;
pub mod validation;

// Re-export commonly used types
pub use allocator::{bitmap::BitmapAllocator, BlockAllocator, Extent};
pub use config::ContainerConfig;
pub use container::{Container, ContainerStats, SharedContainer, StreamInfo, VerifyReport};
pub use envelope::Envelope;
pub use error::{ChecksumRegion, Result, VmgsError};
pub use file_table::{FileTable, FileTableEntry, StreamFlags, MAX_STREAMS};
pub use header::{Header, DEFAULT_BLOCK_SIZE, HEADER_SIZE};
pub use io::{FileStorage, MemoryStorage, Storage};
pub use span::ByteSpan;
pub use validation::well_known;
