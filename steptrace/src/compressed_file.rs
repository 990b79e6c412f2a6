//! Framed compressed file container.
//!
//! Every trace file is a fixed 32-byte frame, a file-specific typed header,
//! and one body block that is either raw or a single zlib stream:
//!
//! ```text
//! +------------------+----------------------+------------------------+
//! | frame (32 bytes) | typed header (frame  | body (zlib stream when |
//! | magic, flags,    |  .header_size bytes) |  is_compressed, raw    |
//! | sizes            |                      |  otherwise)            |
//! +------------------+----------------------+------------------------+
//! ```
//!
//! Writing buffers the body in memory and emits everything at [`close`]
//! (`CompressedFileWriter::close`), compressing once; the typed header may
//! be patched up to that point (streamed thread logs fix up their
//! instruction count at the end). Reading validates the frame up front and
//! decompresses the body lazily on first access, caching it.
//!
//! Opening a file of unknown kind for introspection goes through
//! [`CompressedFileReader::open_raw`], which skips magic and header-size
//! validation and exposes the raw header bytes.

use crate::domain::FileError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::trace;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use steptrace_format::framing::CompressedFileHeader;

/// Write half: body accumulates in memory until [`close`](Self::close).
#[derive(Debug)]
pub struct CompressedFileWriter {
    path: PathBuf,
    magic: u64,
    header: Vec<u8>,
    body: Vec<u8>,
    level: u32,
}

impl CompressedFileWriter {
    /// Start a new file. Nothing touches the filesystem until `close`.
    ///
    /// `level` 0 stores the body raw; 1..=9 are zlib levels.
    #[must_use]
    pub fn create(path: &Path, magic: u64, header: &[u8], level: u32) -> Self {
        assert!(level <= 9, "zlib level {level} out of range");
        Self {
            path: path.to_path_buf(),
            magic,
            header: header.to_vec(),
            body: Vec::new(),
            level,
        }
    }

    /// Append to the pending body.
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Replace the typed header, e.g. to patch in a final count.
    /// The replacement must have the original size.
    pub fn set_header(&mut self, header: &[u8]) {
        assert_eq!(
            header.len(),
            self.header.len(),
            "typed header size may not change after create"
        );
        self.header.copy_from_slice(header);
    }

    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compress (once) and write frame + header + body to disk.
    ///
    /// # Errors
    /// I/O failure creating or writing the file.
    pub fn close(self) -> Result<(), FileError> {
        let decompressed_size = self.body.len() as u64;
        let (is_compressed, payload) = if self.level > 0 {
            let mut enc = ZlibEncoder::new(
                Vec::with_capacity(self.body.len() / 2),
                Compression::new(self.level),
            );
            enc.write_all(&self.body)?;
            (1u64, enc.finish()?)
        } else {
            (0u64, self.body)
        };
        let frame = CompressedFileHeader {
            magic: self.magic,
            is_compressed,
            header_size: self.header.len() as u64,
            decompressed_size,
        };
        trace!(
            "writing {}: {} body bytes, {} on disk",
            self.path.display(),
            decompressed_size,
            payload.len()
        );
        let mut out = BufWriter::new(File::create(&self.path)?);
        out.write_all(&frame.to_bytes())?;
        out.write_all(&self.header)?;
        out.write_all(&payload)?;
        out.flush()?;
        Ok(())
    }
}

/// Read half: frame and typed header are read eagerly, the body lazily.
#[derive(Debug)]
pub struct CompressedFileReader {
    path: PathBuf,
    frame: CompressedFileHeader,
    header: Vec<u8>,
    /// Compressed-or-raw payload, taken when the body is first decoded.
    payload: Option<Vec<u8>>,
    body: Option<Vec<u8>>,
    pos: usize,
}

impl CompressedFileReader {
    /// Open and validate a file of a known kind.
    ///
    /// # Errors
    /// I/O failure, wrong magic, or a typed-header size that does not match
    /// `expected_header_size`.
    pub fn open(
        path: &Path,
        expected_magic: u64,
        expected_header_size: usize,
    ) -> Result<Self, FileError> {
        let rdr = Self::open_raw(path)?;
        if rdr.frame.magic != expected_magic {
            return Err(FileError::BadMagic {
                path: rdr.path,
                expected: expected_magic,
                found: rdr.frame.magic,
            });
        }
        if rdr.frame.header_size != expected_header_size as u64 {
            return Err(FileError::HeaderSizeMismatch {
                path: rdr.path,
                expected: expected_header_size as u64,
                found: rdr.frame.header_size,
            });
        }
        Ok(rdr)
    }

    /// Open any framed file without knowing its kind; only the frame and the
    /// raw header bytes are exposed until the caller decides what it is.
    ///
    /// # Errors
    /// I/O failure or a file too short for its own frame/header.
    pub fn open_raw(path: &Path) -> Result<Self, FileError> {
        let mut file = BufReader::new(File::open(path)?);
        let mut frame_bytes = [0u8; CompressedFileHeader::SIZE];
        file.read_exact(&mut frame_bytes)?;
        let frame = CompressedFileHeader::parse(&frame_bytes)?;
        let header_size = usize::try_from(frame.header_size).map_err(|_| {
            FileError::HeaderSizeMismatch {
                path: path.to_path_buf(),
                expected: 0,
                found: frame.header_size,
            }
        })?;
        let mut header = vec![0u8; header_size];
        file.read_exact(&mut header)?;
        let mut payload = Vec::new();
        file.read_to_end(&mut payload)?;
        Ok(Self {
            path: path.to_path_buf(),
            frame,
            header,
            payload: Some(payload),
            body: None,
            pos: 0,
        })
    }

    #[must_use]
    pub fn frame(&self) -> &CompressedFileHeader {
        &self.frame
    }

    #[must_use]
    pub fn header_bytes(&self) -> &[u8] {
        &self.header
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of body not yet consumed by `read`/`read_exact`.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.frame.decompressed_size as usize - self.pos
    }

    /// Consume the next `n` body bytes.
    ///
    /// # Errors
    /// Decompression failure, a body whose size disagrees with the frame, or
    /// fewer than `n` bytes left.
    pub fn read(&mut self, n: usize) -> Result<&[u8], FileError> {
        self.ensure_body()?;
        let body = self.body.as_deref().unwrap_or(&[]);
        let left = body.len() - self.pos;
        if n > left {
            return Err(FileError::ShortRead { path: self.path.clone(), wanted: n, left });
        }
        let out = &body[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Fill `buf` from the body.
    ///
    /// # Errors
    /// Same conditions as [`read`](Self::read).
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), FileError> {
        let src = self.read(buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Consume everything left of the body.
    ///
    /// # Errors
    /// Decompression failure or a body size that disagrees with the frame.
    pub fn read_all(&mut self) -> Result<&[u8], FileError> {
        self.ensure_body()?;
        let body = self.body.as_deref().unwrap_or(&[]);
        let out = &body[self.pos..];
        self.pos = body.len();
        Ok(out)
    }

    /// Decode and cache the body on first access.
    fn ensure_body(&mut self) -> Result<(), FileError> {
        let Some(payload) = self.payload.take() else {
            return Ok(());
        };
        let body = if self.frame.is_compressed != 0 {
            let mut out = Vec::with_capacity(self.frame.decompressed_size as usize);
            ZlibDecoder::new(payload.as_slice()).read_to_end(&mut out)?;
            out
        } else {
            payload
        };
        if body.len() as u64 != self.frame.decompressed_size {
            return Err(FileError::BodySizeMismatch {
                path: self.path.clone(),
                expected: self.frame.decompressed_size,
                actual: body.len() as u64,
            });
        }
        trace!("decoded {}: {} body bytes", self.path.display(), body.len());
        self.body = Some(body);
        Ok(())
    }
}
