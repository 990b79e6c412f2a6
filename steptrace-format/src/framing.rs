//! Compressed-file framing.
//!
//! Every file in a trace directory starts with the same fixed 32-byte frame,
//! followed by `header_size` bytes of file-specific header and then the body
//! (compressed when `is_compressed != 0`, raw otherwise).

use crate::{ByteReader, FormatError};

/// Fixed frame at offset 0 of every trace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedFileHeader {
    pub magic: u64,
    pub is_compressed: u64,
    pub header_size: u64,
    pub decompressed_size: u64,
}

impl CompressedFileHeader {
    pub const SIZE: usize = 32;

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..16].copy_from_slice(&self.is_compressed.to_le_bytes());
        out[16..24].copy_from_slice(&self.header_size.to_le_bytes());
        out[24..32].copy_from_slice(&self.decompressed_size.to_le_bytes());
        out
    }

    /// Decode the frame from the start of `buf`.
    ///
    /// # Errors
    /// Returns [`FormatError::Truncated`] if `buf` is shorter than
    /// [`Self::SIZE`].
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(buf);
        Ok(Self {
            magic: r.read_u64()?,
            is_compressed: r.read_u64()?,
            header_size: r.read_u64()?,
            decompressed_size: r.read_u64()?,
        })
    }
}
