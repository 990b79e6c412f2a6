//! Structured error types for steptrace
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! Precondition violations (out-of-range index, unsupported bit width,
//! querying a write-mode file) are deliberately *not* represented here; they
//! are programming errors at the call site and panic immediately. These
//! enums cover environment failures, construction-bound failures and
//! data-integrity problems, which callers may want to report with context
//! before giving up.

use crate::domain::types::ThreadId;
use std::path::PathBuf;
use steptrace_format::FormatError;
use thiserror::Error;

/// Errors from the compressed block file container.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("{}: bad magic: expected {expected:#018x}, found {found:#018x}", path.display())]
    BadMagic { path: PathBuf, expected: u64, found: u64 },

    #[error("{}: header size mismatch: expected {expected}, found {found}", path.display())]
    HeaderSizeMismatch { path: PathBuf, expected: u64, found: u64 },

    #[error("{}: decompressed body is {actual} bytes, frame says {expected}", path.display())]
    BodySizeMismatch { path: PathBuf, expected: u64, actual: u64 },

    #[error("{}: read past end of body: wanted {wanted} bytes, {left} left", path.display())]
    ShortRead { path: PathBuf, wanted: usize, left: usize },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Construction failures of the minimal perfect hash.
///
/// Both variants are fatal: a non-unique key set is a caller bug, and a
/// salt-search timeout means the key distribution is pathological. Neither
/// may silently degrade to a slower data structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MphError {
    #[error("key set contains duplicates ({num_keys} keys, {num_unique} unique)")]
    NonUniqueKeys { num_keys: usize, num_unique: usize },

    #[error("no conflict-free salt found for bucket of {bucket_len} keys within {budget_secs}s")]
    SaltSearchTimeout { bucket_len: usize, budget_secs: u64 },

    #[error("empty key set")]
    NoKeys,
}

/// Errors while decoding a trace stream.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("thread {tid}: {stated} instructions in header, {decoded} decoded")]
    InstCountMismatch { tid: ThreadId, stated: u64, decoded: u64 },

    #[error("trace body ends mid-message at offset {offset}")]
    TruncatedMessage { offset: usize },

    #[error("sync frame at offset {offset} has a corrupt magic")]
    BadSyncMagic { offset: usize },

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Errors from trace session finalize/load.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("trace directory {} has no meta.bin", .0.display())]
    NoMeta(PathBuf),

    #[error("region count mismatch: meta.bin says {stated}, found {found} region files")]
    RegionCountMismatch { stated: u64, found: usize },

    #[error("no region bytes on disk for digest {digest_hex}")]
    MissingRegionBytes { digest_hex: String },

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Mph(#[from] MphError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mph_error_display_names_the_cause() {
        let err = MphError::NonUniqueKeys { num_keys: 10, num_unique: 9 };
        assert!(err.to_string().contains("duplicates"));

        let err = MphError::SaltSearchTimeout { bucket_len: 12, budget_secs: 10 };
        assert!(err.to_string().contains("12 keys"));
    }

    #[test]
    fn trace_error_display_includes_thread() {
        let err =
            TraceError::InstCountMismatch { tid: ThreadId(7), stated: 100, decoded: 99 };
        assert_eq!(err.to_string(), "thread TID:7: 100 instructions in header, 99 decoded");
    }
}
