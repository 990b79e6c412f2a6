//! Basic-block reconstruction from a decoded pc sequence.

use crate::domain::INSTR_SZ;

/// A maximal run of contiguously executed instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicBlock {
    pub start: u64,
    pub size: u32,
}

/// Split a time-ordered pc sequence into maximal contiguous runs. A block
/// boundary sits wherever `pc[i] != pc[i-1] + 4`; the trailing run is always
/// emitted, so a single-instruction trace yields one 4-byte block.
#[must_use]
pub fn extract_bbs_from_pc_trace(pcs: &[u64]) -> Vec<BasicBlock> {
    let Some((&first, rest)) = pcs.split_first() else {
        return Vec::new();
    };
    let mut bbs = Vec::new();
    let mut start = first;
    let mut last = first;
    for &pc in rest {
        if pc != last + INSTR_SZ {
            bbs.push(BasicBlock { start, size: (last + INSTR_SZ - start) as u32 });
            start = pc;
        }
        last = pc;
    }
    bbs.push(BasicBlock { start, size: (last + INSTR_SZ - start) as u32 });
    bbs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(start: u64, size: u32) -> BasicBlock {
        BasicBlock { start, size }
    }

    #[test]
    fn mixed_runs_split_at_discontinuities() {
        let bbs = extract_bbs_from_pc_trace(&[100, 104, 108, 200, 204]);
        assert_eq!(bbs, [bb(100, 12), bb(200, 8)]);
    }

    #[test]
    fn single_instruction_yields_one_block() {
        assert_eq!(extract_bbs_from_pc_trace(&[100]), [bb(100, 4)]);
    }

    #[test]
    fn every_step_discontinuous_yields_singleton_blocks() {
        let bbs = extract_bbs_from_pc_trace(&[100, 200, 300]);
        assert_eq!(bbs, [bb(100, 4), bb(200, 4), bb(300, 4)]);
    }

    #[test]
    fn empty_trace_yields_no_blocks() {
        assert!(extract_bbs_from_pc_trace(&[]).is_empty());
    }

    #[test]
    fn revisited_addresses_start_new_blocks() {
        // A loop body executed twice appears as two identical runs.
        let bbs = extract_bbs_from_pc_trace(&[100, 104, 100, 104]);
        assert_eq!(bbs, [bb(100, 8), bb(100, 8)]);
    }
}
