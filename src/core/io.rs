//! Storage backends for VMGS containers
//!
//! A container sees its backing store as a flat, fixed-length byte range.
//! Reads and writes never extend it implicitly: the container calls
//! [`Storage::set_len`] before touching blocks past the current end.

use crate::error::{Result, VmgsError};
use crate::span::ByteSpan;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random-access byte storage
pub trait Storage {
    /// Current length in bytes
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fill `buf` from `offset`; fails with `OutOfRange` past the end
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`; fails with `OutOfRange` past the end
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Grow (zero filled) or truncate
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Make previous writes durable
    fn sync(&mut self) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn len(&self) -> Result<u64> {
        (**self).len()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        (**self).write_at(offset, data)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        (**self).set_len(len)
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }
}

fn check_range(offset: u64, len: usize, capacity: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(VmgsError::OutOfRange {
            offset,
            len: len as u64,
            capacity,
        }),
    }
}

/// In-memory container image
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    span: ByteSpan<Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::from_bytes(Vec::new())
    }

    /// Wrap an existing image
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        MemoryStorage {
            span: ByteSpan::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.span.as_slice()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.span.into_inner()
    }

    fn position(&mut self, offset: u64, len: usize) -> Result<()> {
        let capacity = self.span.capacity() as u64;
        check_range(offset, len, capacity)?;
        self.span.seek(offset as usize)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        MemoryStorage::new()
    }
}

impl Storage for MemoryStorage {
    fn len(&self) -> Result<u64> {
        Ok(self.span.capacity() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.position(offset, buf.len())?;
        buf.copy_from_slice(self.span.read_bytes(buf.len())?);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.position(offset, data.len())?;
        self.span.write_bytes(data)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        let len = usize::try_from(len).map_err(|_| VmgsError::OutOfRange {
            offset: 0,
            len,
            capacity: usize::MAX as u64,
        })?;
        let mut bytes = std::mem::replace(&mut self.span, ByteSpan::new(Vec::new())).into_inner();
        bytes.resize(len, 0);
        self.span = ByteSpan::new(bytes);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Disk-backed container image
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileStorage {
    /// Create (or truncate) an image file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(FileStorage {
            file,
            path: path.as_ref().to_path_buf(),
            len: 0,
        })
    }

    /// Open an existing image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();

        Ok(FileStorage {
            file,
            path: path.as_ref().to_path_buf(),
            len,
        })
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn len(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.len)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
