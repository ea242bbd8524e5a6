//! Compressed write stack: input buffer, zstd encoder, frame buffer, file
//!
//! The encoder's sink is the frame buffer; sealing a frame finishes the
//! encoder (emitting an independently decodable zstd frame), flushes the
//! frame buffer to disk and starts a fresh encoder over the returned sink.
//! On-disk compressed files are therefore plain sequences of whole frames,
//! and state snapshots only ever happen on a frame boundary.

use std::io;

use zstd::stream::write::Encoder;

use super::frame::FrameBuf;
use super::input::InputBuf;
use super::Bufferer;
use crate::error::{CarrierError, Result};
use crate::fileio::FileHandle;
use crate::state::{StateReader, StateVariant, StateWriter};

pub struct ZstdBufferer {
    input: InputBuf,
    enc: Option<Encoder<'static, FrameBuf>>,
    file: FileHandle,
    level: i32,
    // Bytes fed to the encoder since the last seal. A clean encoder is never
    // finished: zstd emits a frame header even for empty frames, which would
    // bump the file's write count on idle closes.
    dirty: bool,
}

impl ZstdBufferer {
    pub fn new(
        input_size: usize,
        framing_size: usize,
        level: i32,
        file: FileHandle,
    ) -> io::Result<Self> {
        let enc = Encoder::new(FrameBuf::with_size(framing_size), level)?;
        Ok(Self {
            input: InputBuf::with_size(input_size),
            enc: Some(enc),
            file,
            level,
            dirty: false,
        })
    }

    /// Drains the input buffer into the compressor without sealing a frame
    fn flush_input(&mut self) -> io::Result<()> {
        if self.input.buffered() == 0 {
            return Ok(());
        }
        let enc = self
            .enc
            .as_mut()
            .ok_or_else(|| io::Error::other("compressor missing mid-operation"))?;
        self.input.flush_into(enc)?;
        self.dirty = true;
        Ok(())
    }

    fn frame_worth_flushing(&self) -> bool {
        self.enc
            .as_ref()
            .map(|e| e.get_ref().worth_flushing())
            .unwrap_or(false)
    }

    /// Ends the current zstd frame, writes it to disk and starts a new one
    ///
    /// No-op on a clean encoder.
    fn seal_frame(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let enc = self
            .enc
            .take()
            .ok_or_else(|| io::Error::other("compressor missing mid-operation"))?;
        let mut framed = enc.finish()?;
        framed.flush_into(&mut self.file)?;
        self.enc = Some(Encoder::new(framed, self.level)?);
        self.dirty = false;
        Ok(())
    }

    fn io_err(&self, e: io::Error) -> CarrierError {
        CarrierError::FileIo {
            path: self.file.live_path().to_path_buf(),
            source: e,
        }
    }
}

impl Bufferer for ZstdBufferer {
    fn write(&mut self, p: &[u8]) -> io::Result<()> {
        self.input.write(p);
        Ok(())
    }

    fn post_write(&mut self) -> io::Result<()> {
        if self.input.overgrown() {
            self.flush_input()?;
        }
        Ok(())
    }

    /// Periodic two-phase flush
    ///
    /// Phase one pushes a worthwhile input buffer into the compressor;
    /// phase two seals the frame once enough compressed output accumulated.
    fn flush(&mut self) -> io::Result<()> {
        if self.input.worth_flushing() {
            self.flush_input()?;
        }
        if self.frame_worth_flushing() {
            self.seal_frame()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush_input().map_err(|e| self.io_err(e))?;
        self.seal_frame().map_err(|e| self.io_err(e))?;
        self.file.close()
    }

    fn rotate(&mut self) -> Result<()> {
        self.file.rotate()
    }

    fn variant(&self) -> StateVariant {
        StateVariant::Zstd
    }

    /// Captures layer positions top-down, forcing a frame boundary first
    ///
    /// The sealed frame leaves the encoder with no cross-frame state, so the
    /// compressor slot in the blob stays empty; restore simply starts a
    /// fresh encoder.
    fn dump_state(&mut self, w: &mut StateWriter) -> Result<()> {
        self.flush_input().map_err(|e| self.io_err(e))?;
        self.seal_frame().map_err(|e| self.io_err(e))?;

        self.input.dump_state(w);
        w.put_bytes(&[]);
        let enc = self.enc.as_ref().ok_or_else(|| CarrierError::StateParse {
            reason: "compressor missing mid-operation".into(),
        })?;
        enc.get_ref().dump_state(w);
        self.file.dump_state(w)
    }

    fn restore_state(&mut self, r: &mut StateReader<'_>) -> Result<()> {
        self.input.restore_state(r)?;
        let comp = r.get_bytes()?;
        if !comp.is_empty() {
            return Err(CarrierError::StateParse {
                reason: "unexpected compressor state".into(),
            });
        }
        let enc = self.enc.as_mut().ok_or_else(|| CarrierError::StateParse {
            reason: "compressor missing mid-operation".into(),
        })?;
        enc.get_mut().restore_state(r)?;
        self.file.restore_state(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifySet;
    use crate::paths::PathGen;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn file(root: &Path) -> FileHandle {
        FileHandle::open(
            "d",
            "n.log",
            "g",
            Arc::new(PathGen::templates(root, "{dir}/{name}", "{dir}/{name}.rot")),
            Arc::new(PathGen::void()),
            0o755,
            Arc::new(NotifySet::disabled()),
        )
        .unwrap()
    }

    fn decompress_frames(data: &[u8]) -> Vec<u8> {
        // A file written by this stack is a concatenation of zstd frames;
        // the streaming decoder consumes them back to back.
        zstd::stream::decode_all(data).unwrap()
    }

    #[test]
    fn test_close_produces_decodable_frame() {
        let tmp = TempDir::new().unwrap();
        let mut b = ZstdBufferer::new(1024, 4096, 3, file(tmp.path())).unwrap();
        b.write(b"hello zstd world").unwrap();
        b.close().unwrap();

        let data = std::fs::read(tmp.path().join("d/n.log")).unwrap();
        assert!(!data.is_empty());
        assert_eq!(decompress_frames(&data), b"hello zstd world");
    }

    #[test]
    fn test_multiple_sealed_frames_concatenate() {
        let tmp = TempDir::new().unwrap();
        let mut b = ZstdBufferer::new(16, 1, 3, file(tmp.path())).unwrap();

        let mut expect = Vec::new();
        for chunk in [&b"first frame payload "[..], b"second frame payload"] {
            b.write(chunk).unwrap();
            expect.extend_from_slice(chunk);
            // Framing size 1 makes every flush seal a frame.
            b.flush().unwrap();
        }
        b.close().unwrap();

        let data = std::fs::read(tmp.path().join("d/n.log")).unwrap();
        assert_eq!(decompress_frames(&data), expect);
    }

    #[test]
    fn test_post_write_does_not_seal() {
        let tmp = TempDir::new().unwrap();
        let mut b = ZstdBufferer::new(4, 1 << 20, 3, file(tmp.path())).unwrap();
        b.write(b"a run of bytes well past the hard cap").unwrap();
        b.post_write().unwrap();
        // Bytes moved into the compressor but no frame reached the file.
        assert_eq!(b.input.buffered(), 0);
        assert_eq!(std::fs::read(tmp.path().join("d/n.log")).unwrap(), b"");
    }

    #[test]
    fn test_dump_state_marks_frame_boundary() {
        let tmp = TempDir::new().unwrap();
        let mut b = ZstdBufferer::new(1024, 1 << 20, 3, file(tmp.path())).unwrap();
        b.write(b"committed prefix").unwrap();

        let mut w = StateWriter::new();
        b.dump_state(&mut w).unwrap();

        // Everything buffered so far is on disk as whole frames.
        let data = std::fs::read(tmp.path().join("d/n.log")).unwrap();
        assert_eq!(decompress_frames(&data), b"committed prefix");
    }

    #[test]
    fn test_restore_truncates_to_frame_boundary() {
        let tmp = TempDir::new().unwrap();
        let mut b = ZstdBufferer::new(1024, 1 << 20, 3, file(tmp.path())).unwrap();
        b.write(b"committed prefix").unwrap();

        let mut w = StateWriter::new();
        b.dump_state(&mut w).unwrap();

        // More data lands on disk after the snapshot, then the process dies.
        b.write(b" uncommitted tail").unwrap();
        b.flush_input().unwrap();
        b.seal_frame().unwrap();

        let blob = w.into_bytes();
        let mut r = StateReader::new(&blob);
        b.restore_state(&mut r).unwrap();

        let data = std::fs::read(tmp.path().join("d/n.log")).unwrap();
        assert_eq!(decompress_frames(&data), b"committed prefix");
    }
}
