//! Uncompressed write stack: input buffer straight into the file

use std::io;

use super::input::InputBuf;
use super::Bufferer;
use crate::error::Result;
use crate::fileio::FileHandle;
use crate::state::{StateReader, StateVariant, StateWriter};

pub struct RawBufferer {
    input: InputBuf,
    file: FileHandle,
}

impl RawBufferer {
    pub fn new(input_size: usize, file: FileHandle) -> Self {
        Self {
            input: InputBuf::with_size(input_size),
            file,
        }
    }
}

impl Bufferer for RawBufferer {
    fn write(&mut self, p: &[u8]) -> io::Result<()> {
        self.input.write(p);
        Ok(())
    }

    fn post_write(&mut self) -> io::Result<()> {
        if self.input.overgrown() {
            self.input.flush_into(&mut self.file)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.input.worth_flushing() {
            self.input.flush_into(&mut self.file)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.input
            .flush_into(&mut self.file)
            .map_err(io_to_file_err(&self.file))?;
        self.file.close()
    }

    fn rotate(&mut self) -> Result<()> {
        self.file.rotate()
    }

    fn variant(&self) -> StateVariant {
        StateVariant::Raw
    }

    fn dump_state(&mut self, w: &mut StateWriter) -> Result<()> {
        self.input
            .flush_into(&mut self.file)
            .map_err(io_to_file_err(&self.file))?;
        self.input.dump_state(w);
        self.file.dump_state(w)
    }

    fn restore_state(&mut self, r: &mut StateReader<'_>) -> Result<()> {
        self.input.restore_state(r)?;
        self.file.restore_state(r)
    }
}

fn io_to_file_err(file: &FileHandle) -> impl Fn(io::Error) -> crate::error::CarrierError {
    let path = file.live_path().to_path_buf();
    move |e| crate::error::CarrierError::FileIo { path: path.clone(), source: e }
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
            Arc::new(PathGen::templates(root, "{dir}/{name}", "{dir}/{name}-%s")),
            Arc::new(PathGen::void()),
            0o755,
            Arc::new(NotifySet::disabled()),
        )
        .unwrap()
    }

    #[test]
    fn test_write_buffers_until_overgrown() {
        let tmp = TempDir::new().unwrap();
        let mut b = RawBufferer::new(4, file(tmp.path()));
        b.write(b"abc").unwrap();
        b.post_write().unwrap();
        let live = tmp.path().join("d/n.log");
        // Below the hard cap nothing reaches the file.
        assert_eq!(std::fs::read(&live).unwrap(), b"");

        b.write(b"defgh").unwrap();
        b.post_write().unwrap();
        assert_eq!(std::fs::read(&live).unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_flush_respects_soft_threshold() {
        let tmp = TempDir::new().unwrap();
        let mut b = RawBufferer::new(4, file(tmp.path()));
        b.write(b"ab").unwrap();
        b.flush().unwrap();
        let live = tmp.path().join("d/n.log");
        assert_eq!(std::fs::read(&live).unwrap(), b"");

        b.write(b"cd").unwrap();
        b.flush().unwrap();
        assert_eq!(std::fs::read(&live).unwrap(), b"abcd");
    }

    #[test]
    fn test_close_drains_everything() {
        let tmp = TempDir::new().unwrap();
        let mut b = RawBufferer::new(1024, file(tmp.path()));
        b.write(b"tail").unwrap();
        b.close().unwrap();
        assert_eq!(std::fs::read(tmp.path().join("d/n.log")).unwrap(), b"tail");
    }
}
