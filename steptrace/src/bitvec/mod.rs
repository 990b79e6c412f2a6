//! Fixed-width bit-packed arrays.
//!
//! A [`BitVec`] behaves like an array of `len` integers that are each
//! exactly `nbits` (1-64) wide. Four packing strategies exist, selected at
//! construction time from the width:
//!
//! - widths 8/16/32/64 index a plain typed buffer, no bit math at all
//! - width 1 packs one element per bit
//! - every other width packs elements contiguously and accesses them
//!   through a double-word read-modify-write, so a logical element never
//!   straddles more than two machine words
//!
//! Dispatch is a `match` on the enum. Hot loops that know their strategy up
//! front should hold the concrete variant ([`PackedBits`], [`ExactBits`],
//! [`SingleBits`]) directly instead of re-matching per element.
//!
//! Out-of-range indices and values that do not fit the element width are
//! caller-checked preconditions and panic; they are not recoverable errors.
//! Backing buffers are always padded to a 16-byte multiple.

pub mod atomic;

pub use atomic::AtomicBitVec;

/// Bit mask of the low `nbits` bits.
#[inline]
#[must_use]
fn elem_mask(nbits: u8) -> u64 {
    debug_assert!(nbits >= 1 && nbits <= 64);
    if nbits == 64 {
        u64::MAX
    } else {
        (1u64 << nbits) - 1
    }
}

/// Number of u64 words backing `len` elements of `nbits` each, padded so the
/// double-word access of the last element stays in bounds and the buffer is
/// a 16-byte multiple.
#[must_use]
fn packed_word_len(nbits: u8, len: usize) -> usize {
    let total_bits = nbits as usize * len;
    let words = total_bits.div_ceil(64) + 1;
    words.next_multiple_of(2)
}

/// Storage for widths 8/16/32/64: direct typed indexing.
#[derive(Debug, Clone)]
pub struct ExactBits<T> {
    buf: Vec<T>,
    len: usize,
}

macro_rules! impl_exact_bits {
    ($ty:ty) => {
        impl ExactBits<$ty> {
            #[must_use]
            pub fn new(len: usize) -> Self {
                let elem_sz = std::mem::size_of::<$ty>();
                let padded = (len * elem_sz).next_multiple_of(16) / elem_sz;
                Self { buf: vec![0; padded], len }
            }

            #[inline]
            #[must_use]
            pub fn get(&self, idx: usize) -> u64 {
                assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
                u64::from(self.buf[idx])
            }

            #[inline]
            pub fn set(&mut self, idx: usize, val: u64) {
                assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
                assert!(
                    val <= u64::from(<$ty>::MAX),
                    "value {val:#x} does not fit in {} bits",
                    <$ty>::BITS
                );
                self.buf[idx] = val as $ty;
            }

            #[must_use]
            pub fn byte_len(&self) -> usize {
                self.buf.len() * std::mem::size_of::<$ty>()
            }
        }
    };
}

impl_exact_bits!(u8);
impl_exact_bits!(u16);
impl_exact_bits!(u32);
impl_exact_bits!(u64);

/// Storage for width 1: one element per bit.
#[derive(Debug, Clone)]
pub struct SingleBits {
    words: Vec<u64>,
    len: usize,
}

impl SingleBits {
    #[must_use]
    pub fn new(len: usize) -> Self {
        let words = len.div_ceil(64).next_multiple_of(2);
        Self { words: vec![0; words], len }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
        self.words[idx / 64] >> (idx % 64) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize, val: bool) {
        assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
        let mask = 1u64 << (idx % 64);
        if val {
            self.words[idx / 64] |= mask;
        } else {
            self.words[idx / 64] &= !mask;
        }
    }

    /// Count of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.get(i))
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.words.len() * 8
    }
}

/// Storage for all remaining widths: contiguous packing with double-word
/// straddled access.
#[derive(Debug, Clone)]
pub struct PackedBits {
    words: Vec<u64>,
    nbits: u8,
    len: usize,
}

impl PackedBits {
    #[must_use]
    pub fn new(nbits: u8, len: usize) -> Self {
        assert!(
            nbits >= 2 && nbits <= 63 && !matches!(nbits, 8 | 16 | 32 | 64),
            "width {nbits} belongs to a different packing strategy"
        );
        Self { words: vec![0; packed_word_len(nbits, len)], nbits, len }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> u64 {
        assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
        let bit_off = idx * self.nbits as usize;
        let word = bit_off / 64;
        let shift = bit_off % 64;
        // The buffer always holds one word past the last element, so the
        // overlapping pair read is in bounds.
        let pair = u128::from(self.words[word]) | u128::from(self.words[word + 1]) << 64;
        (pair >> shift) as u64 & elem_mask(self.nbits)
    }

    #[inline]
    pub fn set(&mut self, idx: usize, val: u64) {
        assert!(idx < self.len, "index {idx} out of range for len {}", self.len);
        assert!(
            val <= elem_mask(self.nbits),
            "value {val:#x} does not fit in {} bits",
            self.nbits
        );
        let bit_off = idx * self.nbits as usize;
        let word = bit_off / 64;
        let shift = bit_off % 64;
        let pair = u128::from(self.words[word]) | u128::from(self.words[word + 1]) << 64;
        let mask = u128::from(elem_mask(self.nbits)) << shift;
        let pair = (pair & !mask) | u128::from(val) << shift;
        self.words[word] = pair as u64;
        self.words[word + 1] = (pair >> 64) as u64;
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.words.len() * 8
    }
}

/// An array of `len` fixed-width integers, strategy chosen from the width.
#[derive(Debug, Clone)]
pub enum BitVec {
    Exact8(ExactBits<u8>),
    Exact16(ExactBits<u16>),
    Exact32(ExactBits<u32>),
    Exact64(ExactBits<u64>),
    Single(SingleBits),
    Packed(PackedBits),
}

impl BitVec {
    /// Create a zeroed array of `len` elements, each `nbits` wide.
    ///
    /// `nbits` outside 1..=64 is a precondition violation and panics.
    #[must_use]
    pub fn new(nbits: u8, len: usize) -> Self {
        match nbits {
            1 => Self::Single(SingleBits::new(len)),
            8 => Self::Exact8(ExactBits::<u8>::new(len)),
            16 => Self::Exact16(ExactBits::<u16>::new(len)),
            32 => Self::Exact32(ExactBits::<u32>::new(len)),
            64 => Self::Exact64(ExactBits::<u64>::new(len)),
            2..=63 => Self::Packed(PackedBits::new(nbits, len)),
            _ => panic!("unsupported bit width {nbits}"),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Exact8(v) => v.len,
            Self::Exact16(v) => v.len,
            Self::Exact32(v) => v.len,
            Self::Exact64(v) => v.len,
            Self::Single(v) => v.len,
            Self::Packed(v) => v.len,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn nbits(&self) -> u8 {
        match self {
            Self::Exact8(_) => 8,
            Self::Exact16(_) => 16,
            Self::Exact32(_) => 32,
            Self::Exact64(_) => 64,
            Self::Single(_) => 1,
            Self::Packed(v) => v.nbits,
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
            Self::Packed(v) => v.get(idx),
        }
    }

    /// Read an element and sign-extend it from the element width.
    #[inline]
    #[must_use]
    pub fn get_signed(&self, idx: usize) -> i64 {
        sign_extend(self.get(idx), self.nbits())
    }

    #[inline]
    pub fn set(&mut self, idx: usize, val: u64) {
        match self {
            Self::Exact8(v) => v.set(idx, val),
            Self::Exact16(v) => v.set(idx, val),
            Self::Exact32(v) => v.set(idx, val),
            Self::Exact64(v) => v.set(idx, val),
            Self::Single(v) => {
                assert!(val <= 1, "value {val:#x} does not fit in 1 bit");
                v.set(idx, val != 0);
            }
            Self::Packed(v) => v.set(idx, val),
        }
    }

    /// Store a signed value, truncated to the element width.
    ///
    /// The value must be representable in `nbits` two's-complement bits.
    #[inline]
    pub fn set_signed(&mut self, idx: usize, val: i64) {
        let nbits = self.nbits();
        if nbits < 64 {
            let min = -(1i64 << (nbits - 1));
            let max = (1i64 << (nbits - 1)) - 1;
            assert!(
                val >= min && val <= max,
                "value {val} does not fit in {nbits} signed bits"
            );
        }
        #[allow(clippy::cast_sign_loss)]
        self.set(idx, val as u64 & elem_mask(nbits));
    }

    /// Backing buffer size in bytes. Always a 16-byte multiple.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Exact8(v) => v.byte_len(),
            Self::Exact16(v) => v.byte_len(),
            Self::Exact32(v) => v.byte_len(),
            Self::Exact64(v) => v.byte_len(),
            Self::Single(v) => v.byte_len(),
            Self::Packed(v) => v.byte_len(),
        }
    }
}

/// Sign-extend the low `nbits` of `raw` to i64 via the top-bit trick:
/// `(raw ^ sign_bit) - sign_bit`.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn sign_extend(raw: u64, nbits: u8) -> i64 {
    if nbits == 64 {
        raw as i64
    } else {
        let sign = 1i64 << (nbits - 1);
        ((raw as i64) ^ sign).wrapping_sub(sign)
    }
}
