//! Big-endian reader and writer used by every wire codec.
//!
//! A [`FrameReader`] is a cursor over a borrowed slice. It never reads past
//! its end: every short read is a format error. Codecs that decode a
//! length-prefixed structure take a [`FrameReader::sub_reader`] bounded to
//! exactly the declared length and call [`FrameReader::expect_end`] when done.
//!
//! A [`FrameWriter`] appends to an owned buffer. Length prefixes are written
//! as placeholders and patched once the structure is complete.

use crate::error::{KnxError, Result};
use alloc::vec::Vec;

/// Cursor over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bytes not yet consumed.
    #[inline]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes consumed so far.
    #[inline]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Peek at the next byte without consuming it.
    #[inline]
    pub fn peek_u8(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(KnxError::truncated)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.peek_u8()?;
        self.pos += 1;
        Ok(value)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_be_bytes(bytes))
    }

    /// Read exactly `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(KnxError::truncated)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Consume and return everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Split off a reader over the next `len` bytes and advance past them.
    pub fn sub_reader(&mut self, len: usize) -> Result<FrameReader<'a>> {
        Ok(FrameReader::new(self.read_bytes(len)?))
    }

    /// Fail unless every byte has been consumed.
    pub fn expect_end(&self) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(KnxError::trailing_bytes())
        }
    }
}

/// Growable big-endian output buffer.
#[derive(Debug, Default, Clone)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Overwrite a single byte written earlier, typically a length prefix.
    pub fn patch_u8(&mut self, at: usize, value: u8) -> Result<()> {
        let slot = self.buf.get_mut(at).ok_or_else(KnxError::invalid_structure)?;
        *slot = value;
        Ok(())
    }

    /// Patch the one-byte length prefix at `at` with the number of bytes
    /// written since (and including) the prefix itself.
    pub fn finish_length_u8(&mut self, at: usize) -> Result<()> {
        let len = u8::try_from(self.buf.len() - at).map_err(|_| KnxError::payload_too_large())?;
        self.patch_u8(at, len)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_reads_big_endian() {
        let data = [0x06, 0x10, 0x02, 0x05, 0xDE, 0xAD, 0xBE, 0xEF];
        let mut r = FrameReader::new(&data);
        assert_eq!(r.read_u8().unwrap(), 0x06);
        assert_eq!(r.read_u8().unwrap(), 0x10);
        assert_eq!(r.read_u16().unwrap(), 0x0205);
        assert_eq!(r.read_array::<4>().unwrap(), [0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(r.expect_end().is_ok());
    }

    #[test]
    fn test_reader_truncated() {
        let mut r = FrameReader::new(&[0x01]);
        assert!(r.read_u16().unwrap_err().is_format_error());
        // a failed read does not consume
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn test_sub_reader_is_bounded() {
        let data = [0x02, 0xAA, 0xBB];
        let mut r = FrameReader::new(&data);
        let mut sub = r.sub_reader(2).unwrap();
        assert_eq!(sub.read_u8().unwrap(), 0x02);
        assert_eq!(sub.read_u8().unwrap(), 0xAA);
        assert!(sub.read_u8().is_err());
        assert_eq!(r.read_u8().unwrap(), 0xBB);
    }

    #[test]
    fn test_expect_end_trailing() {
        let mut r = FrameReader::new(&[1, 2]);
        r.read_u8().unwrap();
        assert!(r.expect_end().is_err());
    }

    #[test]
    fn test_writer_length_prefix() {
        let mut w = FrameWriter::new();
        let at = w.len();
        w.write_u8(0);
        w.write_u8(0x01);
        w.write_u16(0x0E57);
        w.finish_length_u8(at).unwrap();
        assert_eq!(w.as_slice(), &[0x04, 0x01, 0x0E, 0x57]);
    }
}
