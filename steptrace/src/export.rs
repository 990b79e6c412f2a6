//! Coverage export for third-party consumers.
//!
//! Two targets: the drcov container understood by coverage-exploration
//! tools (text preamble with a module table, then fixed 8-byte binary
//! basic-block records), and a plain text listing of one block per line as
//! `path+offset [symbol+offset]`. Both consume reconstructed basic blocks
//! plus the region and symbol tables; nothing here re-reads trace files.

use crate::codec::BasicBlock;
use crate::regions::RegionTable;
use crate::symbols::SymbolTable;
use anyhow::{Context, Result};
use log::warn;
use std::fmt::Write as _;
use std::path::Path;

/// Ties the tables of a loaded trace to its reconstructed blocks.
pub struct CoverageExport<'a> {
    regions: &'a RegionTable,
    symbols: &'a SymbolTable,
}

impl<'a> CoverageExport<'a> {
    #[must_use]
    pub fn new(regions: &'a RegionTable, symbols: &'a SymbolTable) -> Self {
        Self { regions, symbols }
    }

    /// Serialize `bbs` as a drcov version 2 body. Blocks outside every
    /// region are dropped; blocks longer than a record can carry are split.
    #[must_use]
    pub fn drcov(&self, bbs: &[BasicBlock]) -> Vec<u8> {
        let mut records: Vec<(u32, u16, u16)> = Vec::with_capacity(bbs.len());
        for bb in dedup_blocks(bbs) {
            let Some(module_id) = self.regions.lookup_idx(bb.start) else {
                warn!("block at {:#x} outside every module, dropped", bb.start);
                continue;
            };
            let module = &self.regions.regions()[module_id];
            let mut off = bb.start - module.base;
            let mut left = bb.size;
            while left > 0 {
                let chunk = left.min(u32::from(u16::MAX));
                records.push((off as u32, chunk as u16, module_id as u16));
                off += u64::from(chunk);
                left -= chunk;
            }
        }

        let mut out = String::new();
        let _ = writeln!(out, "DRCOV VERSION: 2");
        let _ = writeln!(out, "DRCOV FLAVOR: steptrace");
        let _ = writeln!(out, "Module Table: version 2, count {}", self.regions.len());
        let _ = writeln!(out, "Columns: id, base, end, entry, checksum, timestamp, path");
        for (id, region) in self.regions.regions().iter().enumerate() {
            let _ = writeln!(
                out,
                "{:3}, {:#018x}, {:#018x}, 0x0, 0x0, 0x0, {}",
                id,
                region.base,
                region.base + region.size,
                region.path,
            );
        }
        let _ = writeln!(out, "BB Table: {} bbs", records.len());

        let mut bytes = out.into_bytes();
        bytes.reserve(records.len() * 8);
        for (off, size, module_id) in records {
            bytes.extend_from_slice(&off.to_le_bytes());
            bytes.extend_from_slice(&size.to_le_bytes());
            bytes.extend_from_slice(&module_id.to_le_bytes());
        }
        bytes
    }

    /// Write the drcov body to `path`.
    ///
    /// # Errors
    /// I/O failure.
    pub fn drcov_to_file(&self, bbs: &[BasicBlock], path: &Path) -> Result<()> {
        std::fs::write(path, self.drcov(bbs))
            .with_context(|| format!("writing coverage to {}", path.display()))
    }

    /// One line per unique block: `path+offset [symbol+offset]`, the symbol
    /// part present when one covers the block start.
    #[must_use]
    pub fn text(&self, bbs: &[BasicBlock]) -> String {
        let mut out = String::new();
        for bb in dedup_blocks(bbs) {
            let Some(region) = self.regions.lookup(bb.start) else {
                warn!("block at {:#x} outside every module, dropped", bb.start);
                continue;
            };
            let _ = write!(out, "{}+{:#x}", region.path, bb.start - region.base);
            if let Some(sym) = self.symbols.lookup(bb.start) {
                let _ = write!(out, " [{}+{:#x}]", sym.name, bb.start - sym.base);
            }
            out.push('\n');
        }
        out
    }
}

/// Coverage is a set: repeated executions of a block collapse to one entry,
/// ordered by start address then size.
fn dedup_blocks(bbs: &[BasicBlock]) -> Vec<BasicBlock> {
    let mut blocks = bbs.to_vec();
    blocks.sort_unstable_by_key(|bb| (bb.start, bb.size));
    blocks.dedup();
    blocks
}
