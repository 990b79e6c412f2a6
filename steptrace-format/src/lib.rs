//! # Shared Wire-Level Definitions (trace files ↔ engine)
//!
//! Defines the on-disk layout shared between the trace writer and every
//! consumer of a trace directory: the compressed-file framing header, the
//! per-file typed headers with their magic numbers, the region/symbol
//! descriptor records, the per-instruction message header bitfield, and the
//! CPU-state snapshot.
//!
//! All multi-byte fields are little-endian. Records are encoded and decoded
//! through explicit bounds-checked reads — never by reinterpreting a byte
//! buffer as a struct — so a truncated or corrupt file surfaces as a
//! [`FormatError`] instead of undefined behavior.
//!
//! ## Key Types
//!
//! - [`framing::CompressedFileHeader`] - fixed 32-byte frame at the start of
//!   every trace file
//! - [`headers`] - typed headers for `meta.bin`, `thread-<tid>.bin` and
//!   `macho-region-*.bin`
//! - [`records`] - variable-length region and symbol descriptors
//! - [`cpu::CpuState`] - full register snapshot carried by sync frames
//! - [`msg`] - the packed 8-byte delta-message header

pub mod cpu;
pub mod framing;
pub mod headers;
pub mod msg;
pub mod records;

use thiserror::Error;

/// Errors produced while decoding wire-level structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("buffer truncated: needed {needed} bytes, had {have}")]
    Truncated { needed: usize, have: usize },

    #[error("bad magic: expected {expected:#018x}, found {found:#018x}")]
    BadMagic { expected: u64, found: u64 },

    #[error("header size mismatch: expected {expected} bytes, found {found}")]
    HeaderSizeMismatch { expected: u64, found: u64 },

    #[error("invalid {what} length {len} at offset {offset}")]
    BadLength { what: &'static str, len: u64, offset: usize },

    #[error("{0} is not valid UTF-8")]
    BadString(&'static str),
}

/// Cursor over a byte slice with bounds-checked little-endian reads.
///
/// The variable length of every record is computed from embedded length
/// fields *before* slicing, so a malformed length can never walk the cursor
/// past the end of the buffer.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Take the next `n` bytes.
    ///
    /// # Errors
    /// Returns [`FormatError::Truncated`] if fewer than `n` bytes remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < n {
            return Err(FormatError::Truncated { needed: n, have: self.remaining() });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, FormatError> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    pub fn read_u128(&mut self) -> Result<u128, FormatError> {
        let b = self.take(16)?;
        let mut a = [0u8; 16];
        a.copy_from_slice(b);
        Ok(u128::from_le_bytes(a))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let b = self.take(N)?;
        let mut a = [0u8; N];
        a.copy_from_slice(b);
        Ok(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reads_le_and_tracks_position() {
        let buf = [0x01, 0x00, 0x00, 0x00, 0xff, 0xee];
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.position(), 4);
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn reader_rejects_truncated_input() {
        let mut r = ByteReader::new(&[0u8; 3]);
        assert_eq!(r.read_u64(), Err(FormatError::Truncated { needed: 8, have: 3 }));
    }
}
