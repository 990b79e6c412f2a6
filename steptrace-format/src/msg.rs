//! Packed 8-byte delta-message header.
//!
//! A trace message starts with two little-endian u32 words, one for the
//! general-purpose bank and one for the vector bank. Each word packs up to
//! five 5-bit register indices plus flags:
//!
//! ```text
//! 31  292827262524      2019      1514      10 9       5 4       0
//! ┌─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┬─┐
//! │ ngc │ |c|s│b│   gc4   │   gc3   │   gc2   │   gc1   │   gc0   │
//! └─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┴─┘
//! ```
//!
//! `ngc` (bits 29-31) is the change count, `c` (bit 27) marks a sync frame,
//! `s` (bit 26) a stack-pointer change, `b` (bit 25) a discontiguous pc.
//! The `s`/`b`/`c` flags are only meaningful in the general-purpose word.
//!
//! The header is followed, in order, by the absolute pc (if `b`), the new sp
//! (if `s`), the changed general-purpose values in ascending register-index
//! order, then the changed vector values. A sync frame instead carries
//! [`SYNC_FRAME_MAGIC`] and a complete [`CpuState`](crate::cpu::CpuState).

use crate::cpu::CpuState;
use crate::{ByteReader, FormatError};

/// A message can carry at most this many changed registers per bank; an
/// instruction touching more is encoded as a sync frame.
pub const MAX_CHANGED: u32 = 5;

const PC_BRANCHED_BIT: u32 = 1 << 25;
const SP_CHANGED_BIT: u32 = 1 << 26;
const SYNC_BIT: u32 = 1 << 27;

#[must_use]
pub const fn num_changed(word: u32) -> u32 {
    word >> 29
}

#[must_use]
pub const fn pc_branched(word: u32) -> bool {
    word & PC_BRANCHED_BIT != 0
}

#[must_use]
pub const fn sp_changed(word: u32) -> bool {
    word & SP_CHANGED_BIT != 0
}

#[must_use]
pub const fn is_sync(word: u32) -> bool {
    word & SYNC_BIT != 0
}

/// Number of fixed (pc/sp) u64 slots following the header.
#[must_use]
pub const fn num_fixed_changed(word: u32) -> u32 {
    ((word & PC_BRANCHED_BIT) >> 25) + ((word & SP_CHANGED_BIT) >> 26)
}

/// Register index of the `changed_idx`-th changed register.
#[must_use]
pub const fn reg_idx(word: u32, changed_idx: u32) -> u8 {
    ((word >> (5 * changed_idx)) & 0b1_1111) as u8
}

#[must_use]
pub const fn set_reg_idx(word: u32, changed_idx: u32, reg: u8) -> u32 {
    word | (reg as u32) << (5 * changed_idx)
}

#[must_use]
pub const fn set_num_changed(word: u32, n: u32) -> u32 {
    word | n << 29
}

#[must_use]
pub const fn set_pc_branched(word: u32) -> u32 {
    word | PC_BRANCHED_BIT
}

#[must_use]
pub const fn set_sp_changed(word: u32) -> u32 {
    word | SP_CHANGED_BIT
}

#[must_use]
pub const fn set_sync(word: u32) -> u32 {
    word | SYNC_BIT
}

/// Fixed bytes written between a sync header and its snapshot. Together with
/// the sync header they form a 24-byte needle that substring search can use
/// to locate resume points in a raw thread body without decoding it.
pub const SYNC_FRAME_MAGIC: [u8; 16] = [
    0x43, 0x4e, 0x59, 0x53, 0xbd, 0xaa, 0x30, 0x1b, // 'SYNC'
    0x10, 0x44, 0x1b, 0x4a, 0x30, 0x04, 0x99, 0x76,
];

/// The 24-byte prefix of every sync frame: pure-sync header + magic.
#[must_use]
pub fn sync_frame_needle() -> [u8; 24] {
    let mut needle = [0u8; 24];
    needle[0..4].copy_from_slice(&set_sync(0).to_le_bytes());
    // vec word of a sync header is always zero
    needle[8..24].copy_from_slice(&SYNC_FRAME_MAGIC);
    needle
}

/// Decoded two-word message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub gpr_changed: u32,
    pub vec_changed: u32,
}

impl MsgHeader {
    pub const SIZE: usize = 8;

    /// Total wire size of the message this header starts, header included.
    #[must_use]
    pub fn msg_size(&self) -> usize {
        if self.is_sync() {
            return Self::SIZE + SYNC_FRAME_MAGIC.len() + CpuState::WIRE_SIZE;
        }
        Self::SIZE
            + num_fixed_changed(self.gpr_changed) as usize * 8
            + num_changed(self.gpr_changed) as usize * 8
            + num_changed(self.vec_changed) as usize * 16
    }

    #[must_use]
    pub fn is_sync(&self) -> bool {
        is_sync(self.gpr_changed)
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.gpr_changed.to_le_bytes());
        out[4..8].copy_from_slice(&self.vec_changed.to_le_bytes());
        out
    }

    /// Decode a header, advancing `r` past it.
    ///
    /// # Errors
    /// Returns [`FormatError::Truncated`] on short input.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(Self { gpr_changed: r.read_u32()?, vec_changed: r.read_u32()? })
    }
}
