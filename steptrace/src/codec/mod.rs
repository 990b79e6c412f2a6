//! Trace log codec: per-thread delta encoding and replay.
//!
//! The wire stream per thread is a sequence of variable-length messages,
//! each describing exactly one executed instruction. A message is either a
//! delta frame (header bitfield + only the changed register values) or a
//! sync frame (header sentinel + magic + complete snapshot). Sync frames
//! are emitted on the first event of a thread, whenever more registers
//! change than a delta frame can carry, and unconditionally once
//! [`SYNC_EVERY`] bytes have accumulated since the last one, so a decoder
//! can resume from any sync frame without prior history.

pub mod bb;
pub mod decode;
pub mod encode;

pub use bb::{extract_bbs_from_pc_trace, BasicBlock};
pub use decode::{decode_pcs, MessageReader, StateReplay, TraceMessage};
pub use encode::{LogSink, ThreadTraceContext};

/// Byte budget between unconditional sync frames.
pub const SYNC_EVERY: usize = 1024 * 1024;
