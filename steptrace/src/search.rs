//! Substring search and needle-aligned sharding.
//!
//! Thread bodies can be split for parallel decode at sync-frame boundaries:
//! every sync frame starts with a fixed 24-byte needle, so
//! [`chunk_into_bins_by_needle`] cuts a body into roughly equal bins and
//! snaps each cut forward to the next needle occurrence. The per-bin first
//! occurrence searches are fanned across the worker pool.

use crate::pool::WorkerPool;
use log::debug;
use std::ops::Range;
use std::sync::Arc;

/// Boyer-Moore-Horspool first occurrence of `needle` in `haystack`.
///
/// `needle` must be non-empty.
#[must_use]
pub fn memmem(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    assert!(!needle.is_empty(), "empty needle");
    let n = needle.len();
    if haystack.len() < n {
        return None;
    }
    // Bad-character shift table.
    let mut shift = [n; 256];
    for (i, &b) in needle[..n - 1].iter().enumerate() {
        shift[b as usize] = n - 1 - i;
    }
    let mut pos = 0;
    while pos + n <= haystack.len() {
        if &haystack[pos..pos + n] == needle {
            return Some(pos);
        }
        pos += shift[haystack[pos + n - 1] as usize];
    }
    None
}

/// Cut `buf` into at most `num_bins` ranges, each starting at a needle
/// occurrence and together covering everything from the first occurrence to
/// the end of the buffer. Returns no ranges when the needle never occurs.
#[must_use]
pub fn chunk_into_bins_by_needle(
    pool: &WorkerPool,
    buf: &Arc<Vec<u8>>,
    needle: &[u8],
    num_bins: usize,
) -> Vec<Range<usize>> {
    assert!(num_bins > 0, "need at least one bin");
    if buf.is_empty() {
        return Vec::new();
    }
    let chunk = buf.len().div_ceil(num_bins);
    let needle: Arc<Vec<u8>> = Arc::new(needle.to_vec());
    let jobs: Vec<_> = (0..num_bins)
        .map(|i| {
            let buf = Arc::clone(buf);
            let needle = Arc::clone(&needle);
            move || {
                let guess = i * chunk;
                if guess >= buf.len() {
                    return None;
                }
                memmem(&buf[guess..], &needle).map(|off| guess + off)
            }
        })
        .collect();

    let mut starts: Vec<usize> = pool.run_batch(jobs).into_iter().flatten().collect();
    starts.sort_unstable();
    starts.dedup();
    let bins: Vec<Range<usize>> = starts
        .iter()
        .zip(starts.iter().skip(1).chain(std::iter::once(&buf.len())))
        .map(|(&start, &end)| start..end)
        .collect();
    debug!("sharded {} bytes into {} needle-aligned bins", buf.len(), bins.len());
    bins
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memmem_finds_first_occurrence() {
        assert_eq!(memmem(b"abcabcabc", b"cab"), Some(2));
        assert_eq!(memmem(b"hello", b"hello"), Some(0));
        assert_eq!(memmem(b"xxxxy", b"xy"), Some(3));
        assert_eq!(memmem(b"hay", b"needle"), None);
        assert_eq!(memmem(b"", b"a"), None);
        assert_eq!(memmem(b"aaa", b"b"), None);
    }

    fn synthetic(needle: &[u8], marks: &[usize], len: usize) -> Vec<u8> {
        let mut buf = vec![0xccu8; len];
        for &m in marks {
            buf[m..m + needle.len()].copy_from_slice(needle);
        }
        buf
    }

    #[test]
    fn bins_start_at_needles_and_cover_the_tail() {
        let pool = WorkerPool::new(4);
        let needle = b"\x01\x02\x03\x04";
        let marks = [0usize, 1000, 2500, 7000];
        let buf = Arc::new(synthetic(needle, &marks, 8000));
        let bins = chunk_into_bins_by_needle(&pool, &buf, needle, 4);

        assert!(!bins.is_empty());
        for bin in &bins {
            assert_eq!(&buf[bin.start..bin.start + needle.len()], needle);
        }
        // Contiguous and ending at the buffer end.
        for pair in bins.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(bins[0].start, 0);
        assert_eq!(bins.last().unwrap().end, buf.len());
    }

    #[test]
    fn more_bins_than_needles_dedups() {
        let pool = WorkerPool::new(2);
        let needle = b"\xaa\xbb";
        let buf = Arc::new(synthetic(needle, &[10], 64));
        let bins = chunk_into_bins_by_needle(&pool, &buf, needle, 16);
        assert_eq!(bins, vec![10..64]);
    }

    #[test]
    fn needle_free_buffer_yields_no_bins() {
        let pool = WorkerPool::new(2);
        let buf = Arc::new(vec![0u8; 256]);
        assert!(chunk_into_bins_by_needle(&pool, &buf, b"\x01\x02", 4).is_empty());
    }
}
