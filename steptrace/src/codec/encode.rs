//! Per-thread encode state.
//!
//! [`ThreadTraceContext`] owns the last snapshot it encoded for one thread
//! and turns each new event into the smallest message that reproduces it:
//! nothing but a header for a sequential step, a delta frame for a handful
//! of changed registers, a sync frame otherwise. Only the thread that owns
//! the context ever calls into it; the session map serializes creation.

use crate::compressed_file::CompressedFileWriter;
use crate::domain::{ThreadId, INSTR_SZ};
use log::debug;
use steptrace_format::cpu::{CpuState, GPR_COUNT, VEC_COUNT};
use steptrace_format::msg::{
    set_num_changed, set_pc_branched, set_reg_idx, set_sp_changed, set_sync, MsgHeader,
    MAX_CHANGED, SYNC_FRAME_MAGIC,
};

/// Where encoded messages go: an in-memory log, or a streaming file whose
/// header is patched with the final instruction count at close.
#[derive(Debug)]
pub enum LogSink {
    Buffer(Vec<u8>),
    Stream(CompressedFileWriter),
}

impl LogSink {
    fn write(&mut self, bytes: &[u8]) {
        match self {
            Self::Buffer(buf) => buf.extend_from_slice(bytes),
            Self::Stream(file) => file.write(bytes),
        }
    }
}

#[derive(Debug)]
pub struct ThreadTraceContext {
    tid: ThreadId,
    last: Option<CpuState>,
    sink: LogSink,
    bytes_since_sync: usize,
    num_inst: u64,
    sync_every: usize,
}

impl ThreadTraceContext {
    #[must_use]
    pub fn new(tid: ThreadId, sink: LogSink, sync_every: usize) -> Self {
        assert!(sync_every > 0, "sync interval must be positive");
        debug!("new trace context for {tid}");
        Self { tid, last: None, sink, bytes_since_sync: 0, num_inst: 0, sync_every }
    }

    #[must_use]
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    #[must_use]
    pub fn num_inst(&self) -> u64 {
        self.num_inst
    }

    /// In-memory log bytes, if this context buffers.
    #[must_use]
    pub fn buffer(&self) -> Option<&[u8]> {
        match &self.sink {
            LogSink::Buffer(buf) => Some(buf),
            LogSink::Stream(_) => None,
        }
    }

    pub fn into_sink(self) -> LogSink {
        self.sink
    }

    /// Record one executed instruction with its full register state.
    pub fn log_state(&mut self, st: &CpuState) {
        let Some(last) = self.last else {
            self.write_sync(st);
            return;
        };
        if self.bytes_since_sync >= self.sync_every {
            self.write_sync(st);
            return;
        }

        let mut gpr_idxs = [0u8; MAX_CHANGED as usize];
        let mut gpr_n = 0usize;
        let mut overflow = false;
        for idx in 0..GPR_COUNT {
            if st.gpr(idx) != last.gpr(idx) {
                if gpr_n == MAX_CHANGED as usize {
                    overflow = true;
                    break;
                }
                gpr_idxs[gpr_n] = idx;
                gpr_n += 1;
            }
        }
        let mut vec_idxs = [0u8; MAX_CHANGED as usize];
        let mut vec_n = 0usize;
        if !overflow {
            for idx in 0..VEC_COUNT {
                if st.v[idx as usize] != last.v[idx as usize] {
                    if vec_n == MAX_CHANGED as usize {
                        overflow = true;
                        break;
                    }
                    vec_idxs[vec_n] = idx;
                    vec_n += 1;
                }
            }
        }
        if overflow {
            self.write_sync(st);
            return;
        }

        let branched = st.pc != last.pc + INSTR_SZ;
        let sp_moved = st.sp != last.sp;

        let mut gpr_word = 0u32;
        for (i, &idx) in gpr_idxs[..gpr_n].iter().enumerate() {
            gpr_word = set_reg_idx(gpr_word, i as u32, idx);
        }
        gpr_word = set_num_changed(gpr_word, gpr_n as u32);
        if branched {
            gpr_word = set_pc_branched(gpr_word);
        }
        if sp_moved {
            gpr_word = set_sp_changed(gpr_word);
        }
        let mut vec_word = 0u32;
        for (i, &idx) in vec_idxs[..vec_n].iter().enumerate() {
            vec_word = set_reg_idx(vec_word, i as u32, idx);
        }
        vec_word = set_num_changed(vec_word, vec_n as u32);

        let hdr = MsgHeader { gpr_changed: gpr_word, vec_changed: vec_word };
        let mut msg = Vec::with_capacity(hdr.msg_size());
        msg.extend_from_slice(&hdr.to_bytes());
        if branched {
            msg.extend_from_slice(&st.pc.to_le_bytes());
        }
        if sp_moved {
            msg.extend_from_slice(&st.sp.to_le_bytes());
        }
        for &idx in &gpr_idxs[..gpr_n] {
            msg.extend_from_slice(&st.gpr(idx).to_le_bytes());
        }
        for &idx in &vec_idxs[..vec_n] {
            msg.extend_from_slice(&st.v[idx as usize].to_le_bytes());
        }
        self.emit(&msg);
        self.last = Some(*st);
    }

    /// Record one executed instruction by program counter alone. The light
    /// encoding: a bare header for a sequential step, header + absolute pc
    /// for a branch.
    pub fn log_pc(&mut self, pc: u64) {
        let Some(last) = self.last else {
            let st = CpuState { pc, ..CpuState::default() };
            self.write_sync(&st);
            return;
        };
        if self.bytes_since_sync >= self.sync_every {
            let st = CpuState { pc, ..last };
            self.write_sync(&st);
            return;
        }
        let branched = pc != last.pc + INSTR_SZ;
        let hdr = MsgHeader {
            gpr_changed: if branched { set_pc_branched(0) } else { 0 },
            vec_changed: 0,
        };
        let mut msg = Vec::with_capacity(hdr.msg_size());
        msg.extend_from_slice(&hdr.to_bytes());
        if branched {
            msg.extend_from_slice(&pc.to_le_bytes());
        }
        self.emit(&msg);
        if let Some(last) = &mut self.last {
            last.pc = pc;
        }
    }

    /// A sync frame carries the complete current snapshot and still counts
    /// as one executed instruction.
    fn write_sync(&mut self, st: &CpuState) {
        let hdr = MsgHeader { gpr_changed: set_sync(0), vec_changed: 0 };
        let mut msg = Vec::with_capacity(hdr.msg_size());
        msg.extend_from_slice(&hdr.to_bytes());
        msg.extend_from_slice(&SYNC_FRAME_MAGIC);
        st.encode(&mut msg);
        self.sink.write(&msg);
        self.bytes_since_sync = 0;
        self.num_inst += 1;
        self.last = Some(*st);
    }

    fn emit(&mut self, msg: &[u8]) {
        self.sink.write(msg);
        self.bytes_since_sync += msg.len();
        self.num_inst += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steptrace_format::msg::{num_changed, pc_branched};

    const SYNC_MSG_SIZE: usize = MsgHeader::SIZE + SYNC_FRAME_MAGIC.len() + CpuState::WIRE_SIZE;

    fn buffered(sync_every: usize) -> ThreadTraceContext {
        ThreadTraceContext::new(ThreadId(1), LogSink::Buffer(Vec::new()), sync_every)
    }

    fn header_at(buf: &[u8], off: usize) -> MsgHeader {
        MsgHeader {
            gpr_changed: u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()),
            vec_changed: u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap()),
        }
    }

    #[test]
    fn first_event_is_a_sync_frame() {
        let mut ctx = buffered(SYNC_TEST_EVERY);
        ctx.log_pc(0x1000);
        let buf = ctx.buffer().unwrap();
        let hdr = header_at(buf, 0);
        assert!(hdr.is_sync());
        assert_eq!(buf.len(), hdr.msg_size());
        assert_eq!(ctx.num_inst(), 1);
    }

    const SYNC_TEST_EVERY: usize = 64;

    #[test]
    fn sequential_pc_steps_cost_a_bare_header() {
        let mut ctx = buffered(1 << 20);
        ctx.log_pc(0x1000);
        let sync_len = ctx.buffer().unwrap().len();
        ctx.log_pc(0x1004);
        ctx.log_pc(0x1008);
        let buf = ctx.buffer().unwrap();
        assert_eq!(buf.len(), sync_len + 2 * MsgHeader::SIZE);
        assert!(!pc_branched(header_at(buf, sync_len).gpr_changed));
    }

    #[test]
    fn branches_carry_the_absolute_pc() {
        let mut ctx = buffered(1 << 20);
        ctx.log_pc(0x1000);
        let sync_len = ctx.buffer().unwrap().len();
        ctx.log_pc(0x9000);
        let buf = ctx.buffer().unwrap();
        let hdr = header_at(buf, sync_len);
        assert!(pc_branched(hdr.gpr_changed));
        assert_eq!(&buf[sync_len + 8..sync_len + 16], &0x9000u64.to_le_bytes());
    }

    #[test]
    fn byte_threshold_forces_a_sync_frame() {
        let mut ctx = buffered(SYNC_TEST_EVERY);
        let mut pc = 0x1000u64;
        ctx.log_pc(pc);
        // Bare 8-byte headers accumulate until the 64-byte budget trips.
        let mut syncs = 0;
        for _ in 0..20 {
            pc += INSTR_SZ;
            ctx.log_pc(pc);
        }
        let buf = ctx.buffer().unwrap();
        let mut off = 0;
        while off < buf.len() {
            let hdr = header_at(buf, off);
            if hdr.is_sync() {
                syncs += 1;
            }
            off += hdr.msg_size();
        }
        assert!(syncs >= 2, "expected a forced resync, saw {syncs}");
        assert_eq!(ctx.num_inst(), 21);
    }

    #[test]
    fn small_register_delta_encodes_changed_slots_only() {
        let mut ctx = buffered(1 << 20);
        let mut st = CpuState { pc: 0x1000, sp: 0x7000, ..CpuState::default() };
        ctx.log_state(&st);
        let sync_len = ctx.buffer().unwrap().len();

        st.pc += INSTR_SZ;
        st.x[3] = 77;
        st.v[9] = 1 << 100;
        ctx.log_state(&st);

        let buf = ctx.buffer().unwrap();
        let hdr = header_at(buf, sync_len);
        assert!(!hdr.is_sync());
        assert_eq!(num_changed(hdr.gpr_changed), 1);
        assert_eq!(num_changed(hdr.vec_changed), 1);
        assert_eq!(buf.len(), sync_len + 8 + 8 + 16);
    }

    #[test]
    fn wide_register_delta_falls_back_to_sync() {
        let mut ctx = buffered(1 << 20);
        let mut st = CpuState::default();
        ctx.log_state(&st);
        st.pc += INSTR_SZ;
        for i in 0..6 {
            st.x[i] = i as u64 + 1;
        }
        ctx.log_state(&st);
        let buf = ctx.buffer().unwrap();
        let second = header_at(buf, SYNC_MSG_SIZE);
        assert!(second.is_sync());
        assert_eq!(buf.len(), 2 * SYNC_MSG_SIZE);
    }
}
