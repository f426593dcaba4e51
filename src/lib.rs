//! # vmgs-rs - VM Guest State Containers
//!
//! `vmgs-rs` reads and writes VMGS images: block-structured containers that
//! hold a set of named byte streams (firmware NVRAM, TPM state, key
//! protectors and the like) behind a checksummed header.
//!
//! - **Crash consistent** updates: new data and a new file table are
//!   written to fresh blocks, then the inactive header copy is switched
//!   over; a torn header write falls back to the previous generation
//! - **Checksummed** header and file table (CRC-32)
//! - **Auto-growth** of the image when a stream does not fit
//! - **Key-value envelopes**: UTF-16LE JSON payloads as used by host tooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vmgs_rs::{VmgsBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let mut vmgs = VmgsBuilder::new()
//!     .path("guest.vmgs")
//!     .initial_blocks(256)
//!     .build_file()?;
//!
//! vmgs.write_stream("bios_nvram", b"nvram contents")?;
//! let data = vmgs.read_stream("bios_nvram")?;
//! assert_eq!(data, b"nvram contents");
//!
//! vmgs.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Envelopes
//!
//! ```rust
//! use vmgs_rs::{Envelope, VmgsBuilder, Result};
//! use serde_json::json;
//!
//! # fn main() -> Result<()> {
//! let mut vmgs = VmgsBuilder::new().initial_blocks(16).build_in_memory()?;
//!
//! let mut settings = Envelope::new();
//! settings.insert("name".into(), json!("vm1"));
//! vmgs.write_envelope("attest", &settings)?;
//!
//! assert_eq!(vmgs.read_envelope("attest")?, settings);
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use self::core::{
    allocator, config, container, envelope, error, file_table, header, io, span, validation,
};

// Re-export core types that users need
pub use crate::core::{
    allocator::{BitmapAllocator, BlockAllocator, Extent},
    config::ContainerConfig,
    container::{Container, ContainerStats, SharedContainer, StreamInfo, VerifyReport},
    envelope::Envelope,
    error::{ChecksumRegion, Result, VmgsError},
    file_table::{StreamFlags, MAX_STREAMS},
    header::{Header, DEFAULT_BLOCK_SIZE},
    io::{FileStorage, MemoryStorage, Storage},
    validation::well_known,
};

use std::path::PathBuf;
use tracing::info;

/// Builder for new or existing containers
///
/// # Examples
///
/// ```rust,no_run
/// use vmgs_rs::{VmgsBuilder, Result};
///
/// # fn main() -> Result<()> {
/// // Format a new image with 512-byte blocks, no auto-growth
/// let vmgs = VmgsBuilder::new()
///     .path("/var/lib/vm/guest.vmgs")
///     .block_size(512)
///     .initial_blocks(2048)
///     .auto_grow(false)
///     .build_file()?;
///
/// // Reopen it later
/// let vmgs = VmgsBuilder::new()
///     .path("/var/lib/vm/guest.vmgs")
///     .open_file()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct VmgsBuilder {
    path: Option<PathBuf>,
    config: ContainerConfig,
}

impl VmgsBuilder {
    /// Create a new VmgsBuilder with default settings
    pub fn new() -> Self {
        VmgsBuilder {
            path: None,
            config: ContainerConfig::default(),
        }
    }

    /// Set the image file path
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.config.block_size = block_size;
        self
    }

    pub fn initial_blocks(mut self, blocks: u64) -> Self {
        self.config.initial_blocks = blocks;
        self
    }

    pub fn auto_grow(mut self, enabled: bool) -> Self {
        self.config.auto_grow = enabled;
        self
    }

    pub fn max_blocks(mut self, blocks: u64) -> Self {
        self.config.max_blocks = blocks;
        self
    }

    /// Replace all settings at once (for example from TOML)
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Format a new container in memory
    pub fn build_in_memory(self) -> Result<Container<MemoryStorage>> {
        Container::format(MemoryStorage::new(), self.config)
    }

    /// Format a new container file, replacing any existing file
    pub fn build_file(self) -> Result<Container<FileStorage>> {
        let path = self.require_path()?;
        info!("Creating VMGS file at {:?}", path);
        Container::format(FileStorage::create(&path)?, self.config)
    }

    /// Open an existing container file
    pub fn open_file(self) -> Result<Container<FileStorage>> {
        let path = self.require_path()?;
        info!("Opening VMGS file at {:?}", path);
        Container::open_with(FileStorage::open(&path)?, self.config)
    }

    fn require_path(&self) -> Result<PathBuf> {
        self.path
            .clone()
            .ok_or_else(|| VmgsError::InvalidConfig("path must be set".to_string()))
    }
}

impl Default for VmgsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guest state storage interface
///
/// Lets firmware and host components work against any store of named
/// streams, not only a VMGS container.
///
/// # Examples
///
/// ```rust
/// use vmgs_rs::{well_known, GuestStateStore, Result, VmgsBuilder};
///
/// fn save_nvram<G: GuestStateStore>(store: &mut G, nvram: &[u8]) -> Result<()> {
///     store.write_stream(well_known::BIOS_NVRAM, nvram)
/// }
///
/// # fn main() -> Result<()> {
/// let mut vmgs = VmgsBuilder::new().initial_blocks(16).build_in_memory()?;
/// save_nvram(&mut vmgs, b"vars")?;
/// assert_eq!(vmgs.stream_names(), vec!["bios_nvram".to_string()]);
/// # Ok(())
/// # }
/// ```
pub trait GuestStateStore {
    /// Read the whole contents of a stream
    fn read_stream(&mut self, name: &str) -> Result<Vec<u8>>;

    /// Create or replace a stream
    fn write_stream(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Remove a stream
    fn delete_stream(&mut self, name: &str) -> Result<()>;

    /// Names of all streams
    fn stream_names(&self) -> Vec<String>;

    /// Read a stream as a key-value envelope
    fn read_envelope(&mut self, name: &str) -> Result<Envelope> {
        envelope::decode(&self.read_stream(name)?)
    }

    /// Write a key-value envelope to a stream
    fn write_envelope(&mut self, name: &str, value: &Envelope) -> Result<()> {
        let bytes = envelope::encode(value)?;
        self.write_stream(name, &bytes)
    }
}

impl<S: Storage> GuestStateStore for Container<S> {
    fn read_stream(&mut self, name: &str) -> Result<Vec<u8>> {
        Container::read_stream(self, name)
    }

    fn write_stream(&mut self, name: &str, data: &[u8]) -> Result<()> {
        Container::write_stream(self, name, data)
    }

    fn delete_stream(&mut self, name: &str) -> Result<()> {
        Container::delete_stream(self, name)
    }

    fn stream_names(&self) -> Vec<String> {
        self.streams().into_iter().map(|s| s.name).collect()
    }
}
