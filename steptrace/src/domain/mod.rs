//! Domain model for steptrace
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{rounddown_pow2_mul, ThreadId, INSTR_SZ, PAGE_SZ, PAGE_SZ_MASK};

pub use errors::{FileError, MphError, SessionError, TraceError};
