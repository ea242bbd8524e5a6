//! Persisted pipeline state
//!
//! On controlled shutdown the carrier can dump, per destination, the commit
//! positions of every layer in the write stack into a version-tagged binary
//! blob; on startup the blob restores those positions and truncates files to
//! their recorded offsets, discarding partially-written trailing data.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "LCST" | version u16 | entry count u32
//! entry: dir str | name str | group str | variant u8 | blob len u32 | blob
//! str:   len u32 | utf-8 bytes
//! ```
//!
//! The per-entry blob is produced by the bufferer stack in top-down layer
//! order and consumed in the same order.

use std::path::Path;

use crate::error::{CarrierError, Result};
use crate::registry::DestKey;

pub const STATE_MAGIC: &[u8; 4] = b"LCST";
pub const STATE_VERSION: u16 = 1;

/// Bufferer variant tag stored per entry
///
/// Restore refuses an entry whose tag does not match the running factory,
/// since layer order and count differ between variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StateVariant {
    Raw = 0,
    Zstd = 1,
}

impl StateVariant {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Raw),
            1 => Some(Self::Zstd),
            _ => None,
        }
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Append-only little-endian encoder for the state blob
#[derive(Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Bounds-checked little-endian decoder over a state blob
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| CarrierError::StateParse {
            reason: "length overflow".into(),
        })?;
        if end > self.data.len() {
            return Err(CarrierError::StateParse {
                reason: format!("truncated blob: wanted {} bytes at offset {}", n, self.pos),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_str(&mut self) -> Result<String> {
        let len = self.get_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CarrierError::StateParse {
            reason: "non-utf8 string".into(),
        })
    }

    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

// =============================================================================
// File format
// =============================================================================

/// One destination's dumped layer state
pub struct StateEntry {
    pub key: DestKey,
    pub variant: StateVariant,
    pub blob: Vec<u8>,
}

/// Serializes entries into the on-disk state format
pub fn encode_state(entries: &[StateEntry]) -> Vec<u8> {
    let mut w = StateWriter::new();
    w.buf.extend_from_slice(STATE_MAGIC);
    w.put_u16(STATE_VERSION);
    w.put_u32(entries.len() as u32);
    for entry in entries {
        w.put_str(&entry.key.dir);
        w.put_str(&entry.key.name);
        w.put_str(&entry.key.group);
        w.put_u8(entry.variant as u8);
        w.put_bytes(&entry.blob);
    }
    w.into_bytes()
}

/// Parses the on-disk state format back into entries
pub fn decode_state(data: &[u8]) -> Result<Vec<StateEntry>> {
    let mut r = StateReader::new(data);
    let magic = r.take(4)?;
    if magic != STATE_MAGIC {
        return Err(CarrierError::StateParse {
            reason: "bad magic".into(),
        });
    }
    let version = r.get_u16()?;
    if version != STATE_VERSION {
        return Err(CarrierError::StateVersion { found: version });
    }
    let count = r.get_u32()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let dir = r.get_str()?;
        let name = r.get_str()?;
        let group = r.get_str()?;
        let variant_raw = r.get_u8()?;
        let variant = StateVariant::from_u8(variant_raw).ok_or_else(|| CarrierError::StateParse {
            reason: format!("unknown bufferer variant {}", variant_raw),
        })?;
        let blob = r.get_bytes()?.to_vec();
        entries.push(StateEntry {
            key: DestKey::new(dir, name, group),
            variant,
            blob,
        });
    }
    Ok(entries)
}

/// Writes the encoded state to disk, replacing any previous file
pub fn write_state_file(path: &Path, entries: &[StateEntry]) -> Result<()> {
    let data = encode_state(entries);
    std::fs::write(path, data).map_err(|e| CarrierError::StateFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Reads and decodes a state file
pub fn read_state_file(path: &Path) -> Result<Vec<StateEntry>> {
    let data = std::fs::read(path).map_err(|e| CarrierError::StateFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    decode_state(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(dir: &str, name: &str, group: &str, variant: StateVariant, blob: &[u8]) -> StateEntry {
        StateEntry {
            key: DestKey::new(dir, name, group),
            variant,
            blob: blob.to_vec(),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let entries = vec![
            entry("web", "access.log", "frontend", StateVariant::Zstd, &[1, 2, 3]),
            entry("db", "slow.log", "backend", StateVariant::Raw, &[]),
        ];
        let decoded = decode_state(&encode_state(&entries)).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].key, DestKey::new("web", "access.log", "frontend"));
        assert_eq!(decoded[0].variant, StateVariant::Zstd);
        assert_eq!(decoded[0].blob, vec![1, 2, 3]);
        assert_eq!(decoded[1].variant, StateVariant::Raw);
        assert!(decoded[1].blob.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        assert!(decode_state(b"NOPE\x01\x00\x00\x00\x00\x00").is_err());
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let mut data = encode_state(&[]);
        data[4] = 0xff;
        match decode_state(&data) {
            Err(CarrierError::StateVersion { found }) => assert_eq!(found, 0x00ff),
            other => panic!("expected StateVersion error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_reader_rejects_truncation() {
        let entries = vec![entry("a", "b", "c", StateVariant::Raw, &[9; 64])];
        let data = encode_state(&entries);
        for cut in [5, 12, data.len() - 1] {
            assert!(decode_state(&data[..cut]).is_err());
        }
    }

    proptest! {
        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode_state(&data);
        }
    }
}
