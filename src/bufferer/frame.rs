//! Frame-side byte buffer
//!
//! Sits between the compressor and the file when compressing. Collects
//! compressed output until a whole frame is worth sealing, then the stack
//! flushes it to disk in one write. Implements `io::Write` so the zstd
//! encoder can own it as its sink.

use bytes::BytesMut;
use std::io::{self, Write};

use crate::error::Result;
use crate::state::{StateReader, StateWriter};

pub struct FrameBuf {
    buf: BytesMut,
    size: usize,
    committed: u64,
}

impl FrameBuf {
    pub fn with_size(size: usize) -> Self {
        let size = size.max(1);
        Self {
            buf: BytesMut::with_capacity(size),
            size,
            committed: 0,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Enough compressed bytes accumulated to seal the current frame
    pub fn worth_flushing(&self) -> bool {
        self.buf.len() >= self.size
    }

    /// Moves all buffered bytes downstream
    pub fn flush_into<W: Write>(&mut self, w: &mut W) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        w.write_all(&self.buf)?;
        self.committed += self.buf.len() as u64;
        self.buf.clear();
        Ok(())
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn dump_state(&self, w: &mut StateWriter) {
        w.put_u64(self.committed);
    }

    pub fn restore_state(&mut self, r: &mut StateReader<'_>) -> Result<()> {
        self.committed = r.get_u64()?;
        self.buf.clear();
        Ok(())
    }
}

impl Write for FrameBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_accumulates_until_worth_flushing() {
        let mut f = FrameBuf::with_size(10);
        f.write_all(b"123456789").unwrap();
        assert!(!f.worth_flushing());
        f.write_all(b"0").unwrap();
        assert!(f.worth_flushing());

        let mut out = Vec::new();
        f.flush_into(&mut out).unwrap();
        assert_eq!(out, b"1234567890");
        assert_eq!(f.buffered(), 0);
        assert_eq!(f.committed(), 10);
    }
}
