//! # steptrace - Instruction-Level Trace Encoding Engine
//!
//! steptrace records the instruction-by-instruction execution of a traced
//! process and persists it in a compact, randomly-decodable binary format.
//! The single-stepping machinery itself lives outside this crate; callers
//! feed it `(thread, pc)` or `(thread, full register state)` events plus the
//! target's loaded memory regions and symbols, and this crate handles
//! everything from the delta encoding down to the bytes on disk.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Tracer (single-step / instrumentation)             │
//! └──────────────┬──────────────────────────────────────────────┘
//!                │ (thread, pc) / (thread, CpuState) events
//!                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TraceSession (this crate)                   │
//! │                                                             │
//! │  ┌───────────┐   ┌───────────┐   ┌────────────────────┐   │
//! │  │  Codec    │──▶│ Compressed│──▶│  trace directory   │   │
//! │  │ (deltas)  │   │Block Files│   │ meta.bin, thread-* │   │
//! │  └───────────┘   └───────────┘   └────────────────────┘   │
//! │        │                                                    │
//! │  ┌───────────┐   ┌───────────┐   ┌────────────────────┐   │
//! │  │  Regions  │   │  Symbols  │   │  Export (coverage) │   │
//! │  │ (page MPH)│   │ (sorted)  │   │                    │   │
//! │  └───────────┘   └───────────┘   └────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`bitvec`]: fixed-width bit-packed arrays (1-64 bit elements), with
//!   atomic single-bit variants
//! - [`mph`]: minimal perfect hash over a fixed key set, plus a growable
//!   map built on top of it
//! - [`compressed_file`]: the framed header + compressed-body container
//!   every trace file uses
//! - [`regions`] / [`symbols`]: sorted tables of loaded images and symbols,
//!   with an O(1) page-to-bytes lookup for the decode hot path
//! - [`codec`]: per-thread delta encoding, the cursor decoder, and
//!   basic-block reconstruction
//! - [`pool`] / [`search`]: worker pool and the parallel substring search
//!   used to shard big thread bodies at sync frames
//! - [`session`]: the orchestrator that owns per-thread encoders and writes
//!   or reloads a trace directory
//! - [`export`]: coverage (module + basic-block tables) and text exports
//! - [`domain`]: core ids, constants and error types

pub mod bitvec;
pub mod codec;
pub mod compressed_file;
pub mod domain;
pub mod export;
pub mod mph;
pub mod pool;
pub mod regions;
pub mod search;
pub mod session;
pub mod symbols;

pub use steptrace_format as format;
