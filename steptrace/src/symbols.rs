//! Symbol table: sorted ranges with first-containing lookup.
//!
//! Symbols arrive from the platform symbolicator as plain (base, size, name,
//! owning-image path) tuples. The table only sorts and filters; overlap
//! between symbols is not resolved beyond "first match in base order".

use log::debug;
use steptrace_format::records::SymRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub base: u64,
    pub size: u64,
    pub name: String,
    pub path: String,
}

impl Symbol {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    #[must_use]
    pub fn from_record(rec: SymRecord) -> Self {
        Self { base: rec.base, size: rec.size, name: rec.name, path: rec.path }
    }

    #[must_use]
    pub fn to_record(&self) -> SymRecord {
        SymRecord {
            base: self.base,
            size: self.size,
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    syms: Vec<Symbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new(mut syms: Vec<Symbol>) -> Self {
        syms.sort_by(|a, b| a.base.cmp(&b.base).then(a.size.cmp(&b.size)));
        debug!("symbol table: {} symbols", syms.len());
        Self { syms }
    }

    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.syms
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.syms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    /// First symbol in base-ascending order whose range contains `addr`.
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<&Symbol> {
        // Candidates start before-or-at addr; walk back over zero-sized and
        // too-short symbols until one actually covers it.
        let first_after = self.syms.partition_point(|s| s.base <= addr);
        self.syms[..first_after].iter().find(|s| s.contains(addr))
    }

    /// Symbols overlapping any of the sorted, disjoint half-open
    /// `(start, end)` intervals, in base order. Two-pointer merge over both
    /// sorted sequences.
    #[must_use]
    pub fn symbols_in_intervals(&self, intervals: &[(u64, u64)]) -> Vec<Symbol> {
        let mut out = Vec::new();
        let mut iv = intervals.iter().copied().peekable();
        for sym in &self.syms {
            let sym_end = sym.base + sym.size;
            while let Some(&(_, end)) = iv.peek() {
                if end <= sym.base {
                    iv.next();
                } else {
                    break;
                }
            }
            match iv.peek() {
                Some(&(start, _)) if start < sym_end => out.push(sym.clone()),
                Some(_) => {}
                None => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(base: u64, size: u64, name: &str) -> Symbol {
        Symbol { base, size, name: name.into(), path: "/bin/t".into() }
    }

    #[test]
    fn lookup_returns_first_containing_in_base_order() {
        let table = SymbolTable::new(vec![
            sym(0x3000, 0x100, "c"),
            sym(0x1000, 0x100, "a"),
            sym(0x1000, 0x200, "a_wide"),
            sym(0x2000, 0x10, "b"),
        ]);
        assert_eq!(table.lookup(0x1080).unwrap().name, "a");
        // Only the wider of the two co-based symbols covers 0x1180.
        assert_eq!(table.lookup(0x1180).unwrap().name, "a_wide");
        assert_eq!(table.lookup(0x2008).unwrap().name, "b");
        assert!(table.lookup(0x2800).is_none());
        assert!(table.lookup(0x3100).is_none());
    }

    #[test]
    fn interval_filter_keeps_overlapping_symbols_only() {
        let table = SymbolTable::new(vec![
            sym(0x1000, 0x100, "a"),
            sym(0x2000, 0x100, "b"),
            sym(0x3000, 0x100, "c"),
            sym(0x4000, 0x100, "d"),
        ]);
        // Clips into a and c, covers none of b and d fully or partially.
        let hits = table.symbols_in_intervals(&[(0x10f0, 0x1100), (0x2100, 0x2200), (0x3080, 0x3090)]);
        let names: Vec<&str> = hits.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn empty_inputs_filter_to_nothing() {
        let table = SymbolTable::new(vec![sym(0x1000, 0x100, "a")]);
        assert!(table.symbols_in_intervals(&[]).is_empty());
        assert!(SymbolTable::default().symbols_in_intervals(&[(0, u64::MAX)]).is_empty());
    }
}
