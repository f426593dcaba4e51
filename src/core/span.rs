//! Bounds-checked cursor over a fixed-capacity byte buffer
//!
//! All on-disk structures are parsed and serialized through [`ByteSpan`].
//! Integers are little-endian. The capacity never changes after
//! construction: a read or write that would cross the end fails with
//! [`VmgsError::OutOfRange`] and leaves the cursor where it was.

use crate::error::{Result, VmgsError};

/// Cursor over a fixed-size buffer
#[derive(Debug, Clone)]
pub struct ByteSpan<B> {
    buf: B,
    pos: usize,
}

impl<B: AsRef<[u8]>> ByteSpan<B> {
    /// Wrap a buffer with the cursor at position 0
    pub fn new(buf: B) -> Self {
        ByteSpan { buf, pos: 0 }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().len()
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes between the cursor and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.capacity() - self.pos
    }

    /// Move the cursor to an absolute position
    ///
    /// Seeking to exactly `capacity()` is allowed (end of buffer).
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.capacity() {
            return Err(self.out_of_range(pos, 0));
        }
        self.pos = pos;
        Ok(())
    }

    /// Read `n` bytes and advance the cursor
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        let start = self.pos;
        let end = self.checked_end(n)?;
        self.pos = end;
        Ok(&self.buf.as_ref()[start..end])
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Borrow the whole underlying buffer
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_ref()
    }

    /// Release the underlying buffer
    pub fn into_inner(self) -> B {
        self.buf
    }

    fn checked_end(&self, n: usize) -> Result<usize> {
        match self.pos.checked_add(n) {
            Some(end) if end <= self.capacity() => Ok(end),
            _ => Err(self.out_of_range(self.pos, n)),
        }
    }

    fn out_of_range(&self, offset: usize, len: usize) -> VmgsError {
        VmgsError::OutOfRange {
            offset: offset as u64,
            len: len as u64,
            capacity: self.capacity() as u64,
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ByteSpan<B> {
    /// Write `data` at the cursor and advance past it
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let start = self.pos;
        let end = self.checked_end(data.len())?;
        self.buf.as_mut()[start..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write `n` zero bytes
    pub fn zero_fill(&mut self, n: usize) -> Result<()> {
        let start = self.pos;
        let end = self.checked_end(n)?;
        self.buf.as_mut()[start..end].fill(0);
        self.pos = end;
        Ok(())
    }

    /// Zero-fill up to the next multiple of `alignment`
    ///
    /// A cursor already on a boundary is left untouched.
    pub fn pad_to(&mut self, alignment: usize) -> Result<()> {
        if alignment == 0 {
            return Ok(());
        }
        let rem = self.pos % alignment;
        if rem == 0 {
            return Ok(());
        }
        self.zero_fill(alignment - rem)
    }
}
