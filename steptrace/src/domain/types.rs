//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a raw address
//! where a thread ID is expected, and make function signatures more
//! expressive.

use std::fmt;

/// Target page size. Traced pages are indexed at this granularity.
pub const PAGE_SZ: u64 = 4 * 1024;
pub const PAGE_SZ_MASK: u64 = 0xfff;

/// Fixed instruction width of the traced ISA, in bytes.
pub const INSTR_SZ: u64 = 4;

/// Thread ID of a traced thread, as reported by the stepping machinery.
/// Full wire width: thread headers carry the id as a u64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

impl From<u64> for ThreadId {
    fn from(tid: u64) -> Self {
        ThreadId(tid)
    }
}

/// Round `num` down to a multiple of `pow2_mul` (a power of two).
#[must_use]
pub const fn rounddown_pow2_mul(num: u64, pow2_mul: u64) -> u64 {
    num & !(pow2_mul - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_behaves_at_boundaries() {
        assert_eq!(rounddown_pow2_mul(16, 16), 16);
        assert_eq!(rounddown_pow2_mul(17, 16), 16);
        assert_eq!(rounddown_pow2_mul(PAGE_SZ - 1, PAGE_SZ), 0);
    }
}
