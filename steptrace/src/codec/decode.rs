//! Cursor decoder and state replay.
//!
//! [`MessageReader`] walks a thread body one message at a time with
//! bounds-checked reads; record length is computed from the header before
//! any slicing. [`StateReplay`] folds the messages back into the exact
//! snapshot sequence the encoder saw, one state per instruction;
//! [`decode_pcs`] is the light path that tracks only the program counter.

use crate::domain::{TraceError, INSTR_SZ};
use steptrace_format::cpu::CpuState;
use steptrace_format::msg::{
    num_changed, pc_branched, reg_idx, sp_changed, MsgHeader, SYNC_FRAME_MAGIC,
};
use steptrace_format::{ByteReader, FormatError};

/// One decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceMessage {
    /// Complete snapshot; decoding may resume here with no prior history.
    Sync(CpuState),
    /// Field updates relative to the previous state. A `None` pc means the
    /// sequential step `pc + 4`.
    Delta {
        pc: Option<u64>,
        sp: Option<u64>,
        gprs: Vec<(u8, u64)>,
        vecs: Vec<(u8, u128)>,
    },
}

/// Bounds-checked sequential message cursor over one thread body.
#[derive(Debug)]
pub struct MessageReader<'a> {
    r: ByteReader<'a>,
}

impl<'a> MessageReader<'a> {
    #[must_use]
    pub fn new(body: &'a [u8]) -> Self {
        Self { r: ByteReader::new(body) }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.r.position()
    }

    /// Decode the next message, or `None` at a clean end of body.
    ///
    /// # Errors
    /// A body ending inside a message or a sync frame with a corrupt magic.
    pub fn next_msg(&mut self) -> Result<Option<TraceMessage>, TraceError> {
        if self.r.is_empty() {
            return Ok(None);
        }
        let start = self.r.position();
        let truncated = |e: FormatError| match e {
            FormatError::Truncated { .. } => TraceError::TruncatedMessage { offset: start },
            other => TraceError::Format(other),
        };

        let hdr = MsgHeader::decode(&mut self.r).map_err(truncated)?;
        if hdr.is_sync() {
            let magic = self.r.read_array::<16>().map_err(truncated)?;
            if magic != SYNC_FRAME_MAGIC {
                return Err(TraceError::BadSyncMagic { offset: start });
            }
            let st = CpuState::decode(&mut self.r).map_err(truncated)?;
            return Ok(Some(TraceMessage::Sync(st)));
        }

        let pc = if pc_branched(hdr.gpr_changed) {
            Some(self.r.read_u64().map_err(truncated)?)
        } else {
            None
        };
        let sp = if sp_changed(hdr.gpr_changed) {
            Some(self.r.read_u64().map_err(truncated)?)
        } else {
            None
        };
        let mut gprs = Vec::with_capacity(num_changed(hdr.gpr_changed) as usize);
        for i in 0..num_changed(hdr.gpr_changed) {
            let idx = reg_idx(hdr.gpr_changed, i);
            gprs.push((idx, self.r.read_u64().map_err(truncated)?));
        }
        let mut vecs = Vec::with_capacity(num_changed(hdr.vec_changed) as usize);
        for i in 0..num_changed(hdr.vec_changed) {
            let idx = reg_idx(hdr.vec_changed, i);
            vecs.push((idx, self.r.read_u128().map_err(truncated)?));
        }
        Ok(Some(TraceMessage::Delta { pc, sp, gprs, vecs }))
    }
}

/// Iterator over the reconstructed snapshot sequence, one per instruction.
#[derive(Debug)]
pub struct StateReplay<'a> {
    reader: MessageReader<'a>,
    state: CpuState,
}

impl<'a> StateReplay<'a> {
    #[must_use]
    pub fn new(body: &'a [u8]) -> Self {
        Self { reader: MessageReader::new(body), state: CpuState::default() }
    }

    fn apply(&mut self, msg: TraceMessage) -> CpuState {
        match msg {
            TraceMessage::Sync(st) => self.state = st,
            TraceMessage::Delta { pc, sp, gprs, vecs } => {
                self.state.pc = pc.unwrap_or(self.state.pc + INSTR_SZ);
                if let Some(sp) = sp {
                    self.state.sp = sp;
                }
                for (idx, val) in gprs {
                    self.state.set_gpr(idx, val);
                }
                for (idx, val) in vecs {
                    self.state.v[idx as usize] = val;
                }
            }
        }
        self.state
    }
}

impl Iterator for StateReplay<'_> {
    type Item = Result<CpuState, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.next_msg() {
            Ok(Some(msg)) => Some(Ok(self.apply(msg))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Decode just the program-counter sequence of a thread body.
///
/// # Errors
/// Same conditions as [`MessageReader::next_msg`].
pub fn decode_pcs(body: &[u8]) -> Result<Vec<u64>, TraceError> {
    let mut reader = MessageReader::new(body);
    let mut pcs = Vec::new();
    let mut pc = 0u64;
    while let Some(msg) = reader.next_msg()? {
        pc = match msg {
            TraceMessage::Sync(st) => st.pc,
            TraceMessage::Delta { pc: Some(abs), .. } => abs,
            TraceMessage::Delta { pc: None, .. } => pc + INSTR_SZ,
        };
        pcs.push(pc);
    }
    Ok(pcs)
}
