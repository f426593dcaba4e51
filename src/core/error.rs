use std::fmt;
use thiserror::Error;

/// Region of the container a checksum protects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumRegion {
    /// A superblock copy
    Header,
    /// The file table and its footer
    FileTable,
}

impl fmt::Display for ChecksumRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumRegion::Header => f.write_str("header"),
            ChecksumRegion::FileTable => f.write_str("file table"),
        }
    }
}

#[derive(Error, Debug)]
pub enum VmgsError {
    #[error("Out of range: {len} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfRange { offset: u64, len: u64, capacity: u64 },

    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),

    #[error("{region} checksum mismatch: expected {expected:#010x}, found {actual:#010x}")]
    ChecksumMismatch {
        region: ChecksumRegion,
        expected: u32,
        actual: u32,
    },

    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    #[error("Duplicate stream name: {0}")]
    DuplicateStreamName(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Invalid stream name: {0}")]
    InvalidStreamName(String),

    #[error("File table full: at most {0} streams")]
    TableFull(usize),

    #[error("Out of space: need {needed} contiguous blocks, {available} free")]
    OutOfSpace { needed: u64, available: u64 },

    #[error("Invalid block ID: {0}")]
    InvalidBlockId(u64),

    #[error("Cannot shrink to {requested} blocks: block {highest_used} is in use")]
    ShrinkBelowAllocated { requested: u64, highest_used: u64 },

    #[error("Envelope decode error: {0}")]
    EnvelopeDecode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, VmgsError>;
