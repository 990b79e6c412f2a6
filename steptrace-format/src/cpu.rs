//! Full CPU-state snapshot carried by sync frames.
//!
//! The layout matches the traced target's register file: pc, sp and flags,
//! then x0-x28, fp, lr, then the 32 128-bit vector registers. Serialized
//! size is fixed at [`CpuState::WIRE_SIZE`] bytes.

use crate::{ByteReader, FormatError};

/// Number of addressable general-purpose slots in a delta message.
pub const GPR_COUNT: u8 = 32;

/// Number of vector registers.
pub const VEC_COUNT: u8 = 32;

/// Delta-message index of the frame pointer.
pub const GPR_IDX_FP: u8 = 29;
/// Delta-message index of the link register.
pub const GPR_IDX_LR: u8 = 30;
/// Delta-message index of the flags register. The stack pointer has its own
/// header flag, which frees index 31 for nzcv.
pub const GPR_IDX_NZCV: u8 = 31;

/// Complete register snapshot of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuState {
    pub pc: u64,
    pub sp: u64,
    pub nzcv: u64,
    pub x: [u64; 29],
    pub fp: u64,
    pub lr: u64,
    pub v: [u128; 32],
}

impl Default for CpuState {
    fn default() -> Self {
        Self { pc: 0, sp: 0, nzcv: 0, x: [0; 29], fp: 0, lr: 0, v: [0; 32] }
    }
}

impl CpuState {
    /// Serialized size: pc/sp/nzcv, x0-x28, fp/lr, v0-v31.
    pub const WIRE_SIZE: usize = 8 * 3 + 29 * 8 + 8 * 2 + 32 * 16;

    /// Read a general-purpose slot by its delta-message index.
    ///
    /// Index 31 is the flags register, not sp; sp changes travel under their
    /// own header flag. Out-of-range indices are a caller bug.
    #[must_use]
    pub fn gpr(&self, idx: u8) -> u64 {
        match idx {
            0..=28 => self.x[idx as usize],
            GPR_IDX_FP => self.fp,
            GPR_IDX_LR => self.lr,
            GPR_IDX_NZCV => self.nzcv,
            _ => panic!("gpr index {idx} out of range"),
        }
    }

    /// Write a general-purpose slot by its delta-message index.
    pub fn set_gpr(&mut self, idx: u8, val: u64) {
        match idx {
            0..=28 => self.x[idx as usize] = val,
            GPR_IDX_FP => self.fp = val,
            GPR_IDX_LR => self.lr = val,
            GPR_IDX_NZCV => self.nzcv = val,
            _ => panic!("gpr index {idx} out of range"),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.reserve(Self::WIRE_SIZE);
        out.extend_from_slice(&self.pc.to_le_bytes());
        out.extend_from_slice(&self.sp.to_le_bytes());
        out.extend_from_slice(&self.nzcv.to_le_bytes());
        for x in &self.x {
            out.extend_from_slice(&x.to_le_bytes());
        }
        out.extend_from_slice(&self.fp.to_le_bytes());
        out.extend_from_slice(&self.lr.to_le_bytes());
        for v in &self.v {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Decode a snapshot, advancing `r` past it.
    ///
    /// # Errors
    /// Returns [`FormatError::Truncated`] on short input.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let pc = r.read_u64()?;
        let sp = r.read_u64()?;
        let nzcv = r.read_u64()?;
        let mut x = [0u64; 29];
        for x_reg in &mut x {
            *x_reg = r.read_u64()?;
        }
        let fp = r.read_u64()?;
        let lr = r.read_u64()?;
        let mut v = [0u128; 32];
        for v_reg in &mut v {
            *v_reg = r.read_u128()?;
        }
        Ok(Self { pc, sp, nzcv, x, fp, lr, v })
    }
}
