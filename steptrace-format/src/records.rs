//! Variable-length region and symbol descriptors in `meta.bin`.
//!
//! The body of `meta.bin` is `num_regions` region records followed by
//! `num_syms` symbol records. Each record is a fixed prefix carrying length
//! fields, then the raw path/name bytes.

use crate::{ByteReader, FormatError};

/// Sanity cap on embedded string lengths. A path or symbol name longer than
/// this means the stream is corrupt, not that someone has a 16 MiB path.
const MAX_STR_LEN: u64 = 16 * 1024 * 1024;

/// One memory-region descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRecord {
    pub base: u64,
    pub size: u64,
    pub slide: u64,
    pub uuid: [u8; 16],
    pub digest_sha256: [u8; 32],
    pub is_jit: bool,
    pub path: String,
}

impl RegionRecord {
    /// Fixed prefix size: base, size, slide, uuid, digest, is_jit, path_len.
    pub const PREFIX_SIZE: usize = 8 * 3 + 16 + 32 + 8 + 8;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.base.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.slide.to_le_bytes());
        out.extend_from_slice(&self.uuid);
        out.extend_from_slice(&self.digest_sha256);
        out.extend_from_slice(&u64::from(self.is_jit).to_le_bytes());
        out.extend_from_slice(&(self.path.len() as u64).to_le_bytes());
        out.extend_from_slice(self.path.as_bytes());
    }

    /// Decode one record, advancing `r` past it.
    ///
    /// # Errors
    /// Fails on truncation, an absurd `path_len`, or a non-UTF-8 path.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let base = r.read_u64()?;
        let size = r.read_u64()?;
        let slide = r.read_u64()?;
        let uuid = r.read_array::<16>()?;
        let digest_sha256 = r.read_array::<32>()?;
        let is_jit = r.read_u64()? != 0;
        let path_len = r.read_u64()?;
        if path_len > MAX_STR_LEN {
            return Err(FormatError::BadLength {
                what: "region path",
                len: path_len,
                offset: r.position(),
            });
        }
        let path_bytes = r.take(path_len as usize)?;
        let path = std::str::from_utf8(path_bytes)
            .map_err(|_| FormatError::BadString("region path"))?
            .to_owned();
        Ok(Self { base, size, slide, uuid, digest_sha256, is_jit, path })
    }
}

/// One symbol descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymRecord {
    pub base: u64,
    pub size: u64,
    pub name: String,
    pub path: String,
}

impl SymRecord {
    /// Fixed prefix size: base, size, name_len, path_len.
    pub const PREFIX_SIZE: usize = 8 * 4;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.base.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&(self.name.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.path.len() as u64).to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(self.path.as_bytes());
    }

    /// Decode one record, advancing `r` past it.
    ///
    /// # Errors
    /// Fails on truncation, an absurd length field, or non-UTF-8 strings.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let base = r.read_u64()?;
        let size = r.read_u64()?;
        let name_len = r.read_u64()?;
        let path_len = r.read_u64()?;
        if name_len > MAX_STR_LEN {
            return Err(FormatError::BadLength {
                what: "symbol name",
                len: name_len,
                offset: r.position(),
            });
        }
        if path_len > MAX_STR_LEN {
            return Err(FormatError::BadLength {
                what: "symbol path",
                len: path_len,
                offset: r.position(),
            });
        }
        let name_bytes = r.take(name_len as usize)?;
        let path_bytes = r.take(path_len as usize)?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| FormatError::BadString("symbol name"))?
            .to_owned();
        let path = std::str::from_utf8(path_bytes)
            .map_err(|_| FormatError::BadString("symbol path"))?
            .to_owned();
        Ok(Self { base, size, name, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_record_round_trips() {
        let rec = RegionRecord {
            base: 0x1_0000_0000,
            size: 0x4000,
            slide: 0x8000,
            uuid: [7; 16],
            digest_sha256: [9; 32],
            is_jit: true,
            path: "/usr/lib/dyld".to_owned(),
        };
        let mut buf = Vec::new();
        rec.encode(&mut buf);
        let mut r = ByteReader::new(&buf);
        assert_eq!(RegionRecord::decode(&mut r).unwrap(), rec);
        assert!(r.is_empty());
    }

    #[test]
    fn sym_record_round_trips_back_to_back() {
        let a = SymRecord { base: 0x1000, size: 0x20, name: "_main".into(), path: "/bin/a".into() };
        let b = SymRecord { base: 0x2000, size: 0x40, name: "_free".into(), path: "/bin/b".into() };
        let mut buf = Vec::new();
        a.encode(&mut buf);
        b.encode(&mut buf);
        let mut r = ByteReader::new(&buf);
        assert_eq!(SymRecord::decode(&mut r).unwrap(), a);
        assert_eq!(SymRecord::decode(&mut r).unwrap(), b);
        assert!(r.is_empty());
    }

    #[test]
    fn absurd_length_is_rejected_before_slicing() {
        let rec = SymRecord { base: 0, size: 0, name: "x".into(), path: "y".into() };
        let mut buf = Vec::new();
        rec.encode(&mut buf);
        // Corrupt name_len to a huge value.
        buf[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        let mut r = ByteReader::new(&buf);
        assert!(SymRecord::decode(&mut r).is_err());
    }
}
