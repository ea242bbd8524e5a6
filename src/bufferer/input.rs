//! Input-side byte buffer
//!
//! First layer of every write stack. Accumulates incoming payload bytes and
//! hands them downstream in bulk: `worth_flushing` marks the soft threshold
//! the periodic flusher acts on, `overgrown` the hard cap that forces a
//! flush right after a write.

use bytes::BytesMut;
use std::io::{self, Write};

use crate::error::Result;
use crate::state::{StateReader, StateWriter};

pub struct InputBuf {
    buf: BytesMut,
    size: usize,
    committed: u64,
}

impl InputBuf {
    pub fn with_size(size: usize) -> Self {
        let size = size.max(1);
        Self {
            buf: BytesMut::with_capacity(size),
            size,
            committed: 0,
        }
    }

    pub fn write(&mut self, p: &[u8]) {
        self.buf.extend_from_slice(p);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Soft threshold: enough bytes accumulated to be worth a flush
    pub fn worth_flushing(&self) -> bool {
        self.buf.len() >= self.size
    }

    /// Hard cap: a write pushed the buffer past twice its nominal size
    pub fn overgrown(&self) -> bool {
        self.buf.len() >= self.size * 2
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

    /// Total bytes handed downstream since creation
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let mut b = InputBuf::with_size(8);
        b.write(b"1234567");
        assert!(!b.worth_flushing());
        b.write(b"8");
        assert!(b.worth_flushing());
        assert!(!b.overgrown());
        b.write(b"12345678");
        assert!(b.overgrown());
    }

    #[test]
    fn test_flush_into_drains_and_commits() {
        let mut b = InputBuf::with_size(4);
        b.write(b"abcdef");
        let mut out = Vec::new();
        b.flush_into(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
        assert_eq!(b.buffered(), 0);
        assert_eq!(b.committed(), 6);
        // Empty flush is a no-op.
        b.flush_into(&mut out).unwrap();
        assert_eq!(b.committed(), 6);
    }
}
