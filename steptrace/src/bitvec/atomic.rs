//! Atomic variants of the bit-packed arrays.
//!
//! Concurrency contract: the single-bit path is a compare-free conditional
//! XOR toggle. It reads the current bit and only issues a `fetch_xor` when
//! the stored value differs, so concurrent writers that target disjoint bit
//! positions, or write the same value to the same bit, never tear a word.
//! Two writers racing *different* values onto the same bit leave an
//! unspecified (but untorn) final value: the last toggle wins, not the last
//! intended value. Do not strengthen this silently.
//!
//! Atomic read-modify-write of a multi-bit element that straddles machine
//! words is intentionally not implemented and fails loudly. Exact widths
//! (8/16/32/64) need no RMW and use plain atomic loads/stores.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Atomic width-1 array with the XOR-toggle write path.
#[derive(Debug)]
pub struct AtomicSingleBits {
    words: Vec<AtomicU64>,
    len: usize,
}

impl AtomicSingleBits {
    #[must_use]
    pub fn new(len: usize) -> Self {
        let nwords = len.div_ceil(64).next_multiple_of(2);
        let mut words = Vec::with_capacity(nwords);
        words.resize_with(nwords, AtomicU64::default);
        Self { words, len }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
        self.words[idx / 64].load(Ordering::Relaxed) >> (idx % 64) & 1 != 0
    }

    /// Conditional XOR toggle: only touches the word when the bit actually
    /// changes, so redundant writes from many threads stay contention-free.
    #[inline]
    pub fn set(&self, idx: usize, val: bool) {
        assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
        let word = &self.words[idx / 64];
        let mask = 1u64 << (idx % 64);
        let cur = word.load(Ordering::Relaxed) & mask != 0;
        if cur != val {
            word.fetch_xor(mask, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

macro_rules! exact_atomic {
    ($name:ident, $atomic:ty, $prim:ty) => {
        /// Atomic exact-width array: plain atomic loads and stores, no RMW.
        #[derive(Debug)]
        pub struct $name {
            buf: Vec<$atomic>,
            len: usize,
        }

        impl $name {
            #[must_use]
            pub fn new(len: usize) -> Self {
                let elem_sz = std::mem::size_of::<$prim>();
                let padded = (len * elem_sz).next_multiple_of(16) / elem_sz;
                let mut buf = Vec::with_capacity(padded);
                buf.resize_with(padded, <$atomic>::default);
                Self { buf, len }
            }

            #[inline]
            #[must_use]
            pub fn get(&self, idx: usize) -> u64 {
                assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
                u64::from(self.buf[idx].load(Ordering::Relaxed))
            }

            #[inline]
            pub fn set(&self, idx: usize, val: u64) {
                assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
                assert!(
                    val <= u64::from(<$prim>::MAX),
                    "value {val:#x} does not fit in {} bits",
                    <$prim>::BITS
                );
                self.buf[idx].store(val as $prim, Ordering::Relaxed);
            }
        }
    };
}

exact_atomic!(AtomicExact8, AtomicU8, u8);
exact_atomic!(AtomicExact16, AtomicU16, u16);
exact_atomic!(AtomicExact32, AtomicU32, u32);
exact_atomic!(AtomicExact64, AtomicU64, u64);

/// Atomic fixed-width array, strategy chosen from the width.
#[derive(Debug)]
pub enum AtomicBitVec {
    Exact8(AtomicExact8),
    Exact16(AtomicExact16),
    Exact32(AtomicExact32),
    Exact64(AtomicExact64),
    Single(AtomicSingleBits),
    /// Placeholder for the straddling widths; any access fails loudly.
    Unsupported { nbits: u8 },
}

impl AtomicBitVec {
    /// Create a zeroed atomic array.
    ///
    /// Widths other than 1/8/16/32/64 construct but cannot be accessed:
    /// atomic multi-bit RMW across word boundaries is an intentional gap.
    #[must_use]
    pub fn new(nbits: u8, len: usize) -> Self {
        match nbits {
            1 => Self::Single(AtomicSingleBits::new(len)),
            8 => Self::Exact8(AtomicExact8::new(len)),
            16 => Self::Exact16(AtomicExact16::new(len)),
            32 => Self::Exact32(AtomicExact32::new(len)),
            64 => Self::Exact64(AtomicExact64::new(len)),
            2..=63 => Self::Unsupported { nbits },
            _ => panic!("unsupported bit width {nbits}"),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> u64 {
        match self {
            Self::Exact8(v) => v.get(idx),
            Self::Exact16(v) => v.get(idx),
            Self::Exact32(v) => v.get(idx),
            Self::Exact64(v) => v.get(idx),
            Self::Single(v) => u64::from(v.get(idx)),
            Self::Unsupported { nbits } => {
                unimplemented!("atomic access at width {nbits} straddles machine words")
            }
        }
    }

    #[inline]
    pub fn set(&self, idx: usize, val: u64) {
        match self {
            Self::Exact8(v) => v.set(idx, val),
            Self::Exact16(v) => v.set(idx, val),
            Self::Exact32(v) => v.set(idx, val),
            Self::Exact64(v) => v.set(idx, val),
            Self::Single(v) => {
                assert!(val <= 1, "value {val:#x} does not fit in 1 bit");
                v.set(idx, val != 0);
            }
            Self::Unsupported { nbits } => {
                unimplemented!("atomic write at width {nbits} straddles machine words")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_bit_toggle_round_trips() {
        let bits = AtomicSingleBits::new(200);
        bits.set(0, true);
        bits.set(63, true);
        bits.set(64, true);
        bits.set(199, true);
        assert!(bits.get(0) && bits.get(63) && bits.get(64) && bits.get(199));
        bits.set(64, false);
        assert!(!bits.get(64));
        // Redundant write must not toggle.
        bits.set(0, true);
        assert!(bits.get(0));
    }

    #[test]
    fn disjoint_concurrent_writers_do_not_tear() {
        let bits = Arc::new(AtomicSingleBits::new(4096));
        let mut handles = Vec::new();
        for t in 0..4usize {
            let bits = Arc::clone(&bits);
            handles.push(thread::spawn(move || {
                for i in (t..4096).step_by(4) {
                    bits.set(i, true);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!((0..4096).all(|i| bits.get(i)));
    }

    #[test]
    fn exact_widths_store_atomically() {
        let v = AtomicBitVec::new(32, 10);
        v.set(3, 0xdead_beef);
        assert_eq!(v.get(3), 0xdead_beef);
    }

    #[test]
    #[should_panic(expected = "straddles machine words")]
    fn packed_atomic_write_is_unimplemented() {
        let v = AtomicBitVec::new(7, 10);
        v.set(0, 1);
    }
}
