//! Container configuration
//!
//! Settings can be built in code, through [`crate::VmgsBuilder`], or
//! loaded from TOML:
//!
//! ```toml
//! block_size = 4096
//! initial_blocks = 256
//! auto_grow = true
//! max_blocks = 65536
//! ```
//!
//! Missing keys take their defaults.

use crate::error::{Result, VmgsError};
use crate::header::{validate_block_size, DEFAULT_BLOCK_SIZE, MIN_BLOCKS};
use serde::{Deserialize, Serialize};

/// Blocks allocated by `format` unless configured otherwise (4 MiB at 4 KiB)
pub const DEFAULT_INITIAL_BLOCKS: u64 = 1024;

/// Auto-grow ceiling unless configured otherwise (4 GiB at 4 KiB)
pub const DEFAULT_MAX_BLOCKS: u64 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerConfig {
    /// Bytes per block (power of two, 512..=65536)
    ///
    /// Only used by `format`; `open` takes the block size from the header.
    pub block_size: u32,

    /// Container size in blocks after `format`
    pub initial_blocks: u64,

    /// Double the container when an allocation does not fit
    pub auto_grow: bool,

    /// Upper bound for auto-growth in blocks
    pub max_blocks: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            initial_blocks: DEFAULT_INITIAL_BLOCKS,
            auto_grow: true,
            max_blocks: DEFAULT_MAX_BLOCKS,
        }
    }
}

impl ContainerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ContainerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_block_size(self.block_size)?;

        if self.initial_blocks < MIN_BLOCKS {
            return Err(VmgsError::InvalidConfig(format!(
                "initial_blocks must be at least {}, got {}",
                MIN_BLOCKS, self.initial_blocks
            )));
        }

        if self.max_blocks < self.initial_blocks {
            return Err(VmgsError::InvalidConfig(format!(
                "max_blocks ({}) is below initial_blocks ({})",
                self.max_blocks, self.initial_blocks
            )));
        }

        if self
            .max_blocks
            .checked_mul(self.block_size as u64)
            .is_none()
        {
            return Err(VmgsError::InvalidConfig(format!(
                "max_blocks {} overflows the addressable size",
                self.max_blocks
            )));
        }

        Ok(())
    }
}
