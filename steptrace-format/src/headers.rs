//! Typed per-file headers and their magic numbers.
//!
//! The magic constants are 8-byte values whose low half spells the file kind
//! in ASCII (`META`, `THRD`, `MACH`); the high half is a fixed tag shared by
//! all steptrace files.

use crate::{ByteReader, FormatError};

/// Header of `meta.bin`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaHeader {
    pub num_regions: u64,
    pub num_syms: u64,
}

impl MetaHeader {
    pub const MAGIC: u64 = 0x8d3a_dfb8_4154_454d; // 'META'
    pub const SIZE: usize = 16;

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.num_regions.to_le_bytes());
        out[8..16].copy_from_slice(&self.num_syms.to_le_bytes());
        out
    }

    /// # Errors
    /// Returns [`FormatError::Truncated`] on short input.
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(buf);
        Ok(Self { num_regions: r.read_u64()?, num_syms: r.read_u64()? })
    }
}

/// Header of `thread-<tid>.bin`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadHeader {
    pub thread_id: u64,
    pub num_inst: u64,
}

impl ThreadHeader {
    pub const MAGIC: u64 = 0x8d3a_dfb8_4452_4854; // 'THRD'
    pub const SIZE: usize = 16;

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.thread_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.num_inst.to_le_bytes());
        out
    }

    /// # Errors
    /// Returns [`FormatError::Truncated`] on short input.
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(buf);
        Ok(Self { thread_id: r.read_u64()?, num_inst: r.read_u64()? })
    }
}

/// Header of `macho-region-<name>-<digest-prefix>.bin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionFileHeader {
    pub digest_sha256: [u8; 32],
}

impl RegionFileHeader {
    pub const MAGIC: u64 = 0x8d3a_dfb8_4843_414d; // 'MACH'
    pub const SIZE: usize = 32;

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.digest_sha256
    }

    /// # Errors
    /// Returns [`FormatError::Truncated`] on short input.
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(buf);
        Ok(Self { digest_sha256: r.read_array::<32>()? })
    }
}
