//! Memory-region table with content digests and page-granular lookup.
//!
//! Regions arrive from the stepping machinery as captured snapshots (base,
//! size, slide, path, uuid, raw bytes). The table sorts them by base, hashes
//! each snapshot for change detection, and builds a minimal-perfect-hash map
//! from page address to the bytes backing that page, which is what the
//! decode path hits once per instruction fetch. Pages of JIT regions shadow
//! pages of on-disk images at the same address.

use crate::domain::{rounddown_pow2_mul, MphError, PAGE_SZ, PAGE_SZ_MASK};
use crate::mph::MphMap;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use steptrace_format::records::RegionRecord;

/// One captured memory region.
#[derive(Debug, Clone)]
pub struct ImageRegion {
    pub base: u64,
    pub size: u64,
    pub slide: u64,
    pub uuid: [u8; 16],
    pub digest_sha256: [u8; 32],
    pub is_jit: bool,
    pub path: String,
    pub bytes: Vec<u8>,
}

impl ImageRegion {
    /// Wrap a fresh capture, computing its content digest.
    #[must_use]
    pub fn new(
        base: u64,
        size: u64,
        slide: u64,
        uuid: [u8; 16],
        is_jit: bool,
        path: String,
        bytes: Vec<u8>,
    ) -> Self {
        let digest_sha256: [u8; 32] = Sha256::digest(&bytes).into();
        Self { base, size, slide, uuid, digest_sha256, is_jit, path, bytes }
    }

    /// Rehydrate from a decoded descriptor plus the bytes stored under its
    /// digest.
    #[must_use]
    pub fn from_record(rec: RegionRecord, bytes: Vec<u8>) -> Self {
        Self {
            base: rec.base,
            size: rec.size,
            slide: rec.slide,
            uuid: rec.uuid,
            digest_sha256: rec.digest_sha256,
            is_jit: rec.is_jit,
            path: rec.path,
            bytes,
        }
    }

    #[must_use]
    pub fn to_record(&self) -> RegionRecord {
        RegionRecord {
            base: self.base,
            size: self.size,
            slide: self.slide,
            uuid: self.uuid,
            digest_sha256: self.digest_sha256,
            is_jit: self.is_jit,
            path: self.path.clone(),
        }
    }

    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    /// Short display name: last path component, or a synthetic name for
    /// anonymous JIT mappings.
    #[must_use]
    pub fn name(&self) -> String {
        Self::display_name(&self.path, self.base)
    }

    /// Last path component, or a synthetic name for anonymous JIT mappings.
    #[must_use]
    pub fn display_name(path: &str, base: u64) -> String {
        let last = path.rsplit('/').next().unwrap_or_default();
        if last.is_empty() {
            format!("jit-{base:x}")
        } else {
            last.to_owned()
        }
    }

    /// On-disk file name for this region's byte snapshot: the sanitized
    /// region name plus the first 4 digest bytes in hex, so unchanged
    /// content keeps a stable name across captures.
    #[must_use]
    pub fn log_path(&self) -> String {
        Self::log_path_for(&self.name(), &self.digest_sha256)
    }

    /// Same naming rule, computable from a decoded descriptor.
    #[must_use]
    pub fn log_path_for(name: &str, digest: &[u8; 32]) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        format!("macho-region-{}-{}.bin", sanitized, hex::encode(&digest[..4]))
    }
}

/// Where a traced page's bytes live: region index plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageSlot {
    region_idx: u32,
    offset: u64,
}

/// All captured regions, sorted by base, with the per-page hash map.
#[derive(Debug)]
pub struct RegionTable {
    regions: Vec<ImageRegion>,
    page_map: MphMap<u64, PageSlot>,
}

impl RegionTable {
    /// Sort the capture and build the page map.
    ///
    /// # Errors
    /// Propagates hash construction failure.
    pub fn new(mut regions: Vec<ImageRegion>) -> Result<Self, MphError> {
        regions.sort_by_key(|r| r.base);

        // Overwrite-if-present: JIT pages win over same-address image pages,
        // so insert image regions first and let JIT regions shadow them.
        let mut pages: HashMap<u64, PageSlot> = HashMap::new();
        for jit_pass in [false, true] {
            for (region_idx, region) in regions.iter().enumerate() {
                if region.is_jit != jit_pass {
                    continue;
                }
                if region.base & PAGE_SZ_MASK != 0 {
                    warn!("region {} base {:#x} not page aligned", region.name(), region.base);
                }
                let mut page = rounddown_pow2_mul(region.base, PAGE_SZ);
                while page < region.base + region.size {
                    pages.insert(
                        page,
                        PageSlot {
                            region_idx: region_idx as u32,
                            offset: page.saturating_sub(region.base),
                        },
                    );
                    page += PAGE_SZ;
                }
            }
        }

        // Fixed key order keeps the hash construction deterministic.
        let mut pairs: Vec<(u64, PageSlot)> = pages.into_iter().collect();
        pairs.sort_unstable_by_key(|&(page, _)| page);
        let npages = pairs.len();
        let page_map = MphMap::from_pairs(pairs)?;
        debug!("region table: {} regions, {} pages", regions.len(), npages);
        Ok(Self { regions, page_map })
    }

    #[must_use]
    pub fn regions(&self) -> &[ImageRegion] {
        &self.regions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Index of the region containing `addr`.
    #[must_use]
    pub fn lookup_idx(&self, addr: u64) -> Option<usize> {
        // First region at-or-before addr; regions are sorted and disjoint.
        let idx = self.regions.partition_point(|r| r.base <= addr).checked_sub(1)?;
        self.regions[idx].contains(addr).then_some(idx)
    }

    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<&ImageRegion> {
        self.lookup_idx(addr).map(|idx| &self.regions[idx])
    }

    /// Bytes backing the page containing `addr`, possibly shorter than a
    /// full page when the region ends inside it.
    #[must_use]
    pub fn lookup_page(&self, addr: u64) -> Option<&[u8]> {
        let page = rounddown_pow2_mul(addr, PAGE_SZ);
        let slot = self.page_map.get(page)?;
        let region = &self.regions[slot.region_idx as usize];
        let start = slot.offset as usize;
        let end = (slot.offset + PAGE_SZ).min(region.bytes.len() as u64) as usize;
        Some(&region.bytes[start..end])
    }

    /// Fetch the 4-byte instruction word at `addr`.
    #[must_use]
    pub fn lookup_inst(&self, addr: u64) -> Option<u32> {
        let page = self.lookup_page(addr)?;
        let off = (addr & PAGE_SZ_MASK) as usize;
        let word = page.get(off..off + 4)?;
        Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(base: u64, size: u64, is_jit: bool, path: &str, fill: u8) -> ImageRegion {
        ImageRegion::new(base, size, 0, [0; 16], is_jit, path.to_owned(), vec![fill; size as usize])
    }

    #[test]
    fn lookup_finds_containing_region() {
        let table = RegionTable::new(vec![
            region(0x2000_0000, 2 * PAGE_SZ, false, "/usr/lib/b", 2),
            region(0x1000_0000, PAGE_SZ, false, "/usr/lib/a", 1),
        ])
        .unwrap();
        assert_eq!(table.lookup(0x1000_0000).unwrap().path, "/usr/lib/a");
        assert_eq!(table.lookup(0x2000_0fff).unwrap().path, "/usr/lib/b");
        assert_eq!(table.lookup(0x2000_0000 + 2 * PAGE_SZ - 1).unwrap().path, "/usr/lib/b");
        assert!(table.lookup(0x1000_0000 + PAGE_SZ).is_none());
        assert!(table.lookup(0).is_none());
    }

    #[test]
    fn page_lookup_returns_region_bytes() {
        let mut bytes = vec![0u8; PAGE_SZ as usize * 2];
        bytes[PAGE_SZ as usize] = 0xee;
        let table = RegionTable::new(vec![ImageRegion::new(
            0x4000_0000,
            PAGE_SZ * 2,
            0,
            [0; 16],
            false,
            "/x".into(),
            bytes,
        )])
        .unwrap();
        let page = table.lookup_page(0x4000_0000 + PAGE_SZ + 17).unwrap();
        assert_eq!(page.len(), PAGE_SZ as usize);
        assert_eq!(page[0], 0xee);
        assert!(table.lookup_page(0x5000_0000).is_none());
    }

    #[test]
    fn jit_pages_shadow_image_pages() {
        let table = RegionTable::new(vec![
            region(0x1000_0000, PAGE_SZ, false, "/usr/lib/a", 0x11),
            region(0x1000_0000, PAGE_SZ, true, "", 0x99),
        ])
        .unwrap();
        assert_eq!(table.lookup_page(0x1000_0000).unwrap()[0], 0x99);
    }

    #[test]
    fn instruction_fetch_reads_little_endian() {
        let mut bytes = vec![0u8; PAGE_SZ as usize];
        bytes[8..12].copy_from_slice(&0xd503_201fu32.to_le_bytes()); // nop
        let table = RegionTable::new(vec![ImageRegion::new(
            0x1_0000_0000,
            PAGE_SZ,
            0,
            [0; 16],
            false,
            "/bin/t".into(),
            bytes,
        )])
        .unwrap();
        assert_eq!(table.lookup_inst(0x1_0000_0008).unwrap(), 0xd503_201f);
        assert!(table.lookup_inst(0x1_0000_0000 + PAGE_SZ - 2).is_none());
    }

    #[test]
    fn log_path_is_sanitized_and_digest_tagged() {
        let r = region(0x1000, PAGE_SZ, false, "/usr/lib/libfoo bar.dylib", 3);
        let name = r.log_path();
        assert!(name.starts_with("macho-region-libfoo_bar.dylib-"));
        assert!(name.ends_with(".bin"));
        assert_eq!(name.len(), "macho-region-libfoo_bar.dylib-".len() + 8 + 4);
        // Same bytes, same name; different bytes, different name.
        let r2 = region(0x2000, PAGE_SZ, false, "/usr/lib/libfoo bar.dylib", 3);
        assert_eq!(name, r2.log_path());
        let r3 = region(0x2000, PAGE_SZ, false, "/usr/lib/libfoo bar.dylib", 4);
        assert_ne!(name, r3.log_path());
    }

    #[test]
    fn record_round_trip_preserves_digest() {
        let r = region(0x7000, PAGE_SZ, false, "/bin/z", 9);
        let rec = r.to_record();
        let back = ImageRegion::from_record(rec, r.bytes.clone());
        assert_eq!(back.digest_sha256, r.digest_sha256);
        assert_eq!(back.base, r.base);
    }
}
