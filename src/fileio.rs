//! Rotation-steady file handles
//!
//! A `FileHandle` owns the open descriptor for a destination's live file
//! plus its optional symlink. The handle survives rotation: `close` releases
//! the descriptor but keeps the identity, and the next write lazily reopens
//! with a fresh timestamp and freshly derived paths.

use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::constants::SYMLINK_TMP_NAME_CAP;
use crate::error::{CarrierError, Result};
use crate::notify::NotifySet;
use crate::paths::PathGen;

/// Open append-only file for one destination
pub struct FileHandle {
    namegen: Arc<PathGen>,
    linkgen: Arc<PathGen>,
    dirmode: u32,

    dir: String,
    name: String,
    group: String,

    live: PathBuf,
    link: Option<PathBuf>,

    file: Option<File>,
    opened_at: DateTime<Local>,
    write_count: u64,

    notifiers: Arc<NotifySet>,
}

impl FileHandle {
    /// Opens the live file for a destination, creating parent directories
    /// and the configured symlink
    pub fn open(
        dir: &str,
        name: &str,
        group: &str,
        namegen: Arc<PathGen>,
        linkgen: Arc<PathGen>,
        dirmode: u32,
        notifiers: Arc<NotifySet>,
    ) -> Result<Self> {
        if namegen.is_void() {
            return Err(CarrierError::ConfigValidation {
                field: "Files.Name",
                reason: "file path generator cannot be void".into(),
            });
        }
        let mut handle = Self {
            namegen,
            linkgen,
            dirmode,
            dir: dir.to_string(),
            name: name.to_string(),
            group: group.to_string(),
            live: PathBuf::new(),
            link: None,
            file: None,
            opened_at: Local::now(),
            write_count: 0,
            notifiers,
        };
        handle.reopen()?;
        Ok(handle)
    }

    /// Derives fresh paths and opens the descriptor
    ///
    /// Called from `open` and lazily from `write` after a `close`.
    fn reopen(&mut self) -> Result<()> {
        let t = Local::now();
        let live = self
            .namegen
            .live(&self.dir, &self.name, &self.group, &t)
            .ok_or_else(|| CarrierError::ConfigValidation {
                field: "Files.Name",
                reason: "file path generator produced nothing".into(),
            })?;

        self.mkdir_parent(&live)?;
        self.notifiers.file_before.notify(&live)?;

        let file = open_append(&live).map_err(|e| CarrierError::FileOpen {
            path: live.clone(),
            source: e,
        })?;

        let link = self.linkgen.live(&self.dir, &self.name, &self.group, &t);
        if let Some(ref lname) = link {
            self.mkdir_parent(lname)?;
            self.notifiers.link_before.notify(lname)?;
            create_symlink_over(&live, lname)?;
        }

        self.file = Some(file);
        self.live = live;
        self.link = link;
        self.opened_at = t;
        Ok(())
    }

    fn mkdir_parent(&self, path: &Path) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.dirmode);
        }
        builder.create(parent).map_err(|e| CarrierError::FileOpen {
            path: parent.to_path_buf(),
            source: e,
        })
    }

    /// Releases the descriptor; the next write reopens
    pub fn close(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn live_path(&self) -> &Path {
        &self.live
    }

    /// Renames the live file into its rotation target
    ///
    /// Preconditions: the descriptor is closed (the bufferer closes the
    /// stack first). A handle that has seen no writes since the last
    /// rotation skips silently and produces no empty rotated file.
    pub fn rotate(&mut self) -> Result<()> {
        let t = self.opened_at;
        let rot = self
            .namegen
            .rotation(&self.dir, &self.name, &self.group, &t)
            .ok_or_else(|| CarrierError::ConfigValidation {
                field: "Files.Rotation",
                reason: "rotation path generator produced nothing".into(),
            })?;

        if self.write_count == 0 {
            info!(path = %rot.display(), "no data collected, omitting log rotation");
            return Ok(());
        }
        if self.file.is_some() {
            return Err(CarrierError::RotateOpenHandle {
                path: self.live.clone(),
            });
        }
        if !self.live.exists() {
            return Err(CarrierError::RotateMissingSource {
                path: self.live.clone(),
            });
        }
        if rot.exists() {
            return Err(CarrierError::RotateTargetExists { path: rot });
        }

        if let Some(ref link) = self.link {
            match std::fs::remove_file(link) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CarrierError::SymlinkRemove {
                        path: link.clone(),
                        source: e,
                    })
                }
            }
        }

        std::fs::rename(&self.live, &rot).map_err(|e| CarrierError::RotateRename {
            from: self.live.clone(),
            to: rot.clone(),
            source: e,
        })?;

        self.notifiers.file_after.notify(&rot)?;

        if let Some(rotlink) = self.linkgen.rotation(&self.dir, &self.name, &self.group, &t) {
            self.mkdir_parent(&rotlink)?;
            symlink(&rot, &rotlink).map_err(|e| CarrierError::SymlinkCreate {
                link: rotlink.clone(),
                target: rot.clone(),
                source: e,
            })?;
            self.notifiers.link_after.notify(&rotlink)?;
        }

        self.write_count = 0;
        Ok(())
    }

    /// Writes the current file offset into the state blob
    pub fn dump_state(&mut self, w: &mut crate::state::StateWriter) -> Result<()> {
        if self.file.is_none() {
            self.reopen()?;
        }
        let file = self.file.as_mut().ok_or_else(|| CarrierError::FileIo {
            path: self.live.clone(),
            source: io::Error::other("descriptor lost after reopen"),
        })?;
        // Append mode keeps the cursor wherever the last write left it; the
        // committed offset is always the end of the file.
        let pos = file
            .seek(io::SeekFrom::End(0))
            .map_err(|e| CarrierError::FileIo {
                path: self.live.clone(),
                source: e,
            })?;
        w.put_i64(pos as i64);
        Ok(())
    }

    /// Truncates the file to the offset recorded in the state blob
    ///
    /// Discards partially-written trailing data with no upstream commitment.
    pub fn restore_state(&mut self, r: &mut crate::state::StateReader<'_>) -> Result<()> {
        let pos = r.get_i64()?;
        if pos < 0 {
            return Err(CarrierError::StateParse {
                reason: format!("negative file offset {}", pos),
            });
        }
        if self.file.is_none() {
            self.reopen()?;
        }
        let file = self.file.as_mut().ok_or_else(|| CarrierError::FileIo {
            path: self.live.clone(),
            source: io::Error::other("descriptor lost after reopen"),
        })?;
        file.set_len(pos as u64).map_err(|e| CarrierError::FileIo {
            path: self.live.clone(),
            source: e,
        })?;
        file.seek(io::SeekFrom::End(0)).map_err(|e| CarrierError::FileIo {
            path: self.live.clone(),
            source: e,
        })?;
        Ok(())
    }
}

impl Write for FileHandle {
    /// Appends to the live file, lazily reopening a closed handle
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.file.is_none() {
            self.reopen().map_err(io::Error::other)?;
        }
        self.write_count += 1;
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("descriptor lost after reopen")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true).read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o644);
    }
    opts.open(path)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::other("symlinks unsupported on this platform"))
}

/// Creates `link -> target`, atomically replacing a stale link
///
/// A fresh location gets a direct create. When the location is occupied the
/// link is created under a suffixed temporary name and renamed over the
/// final one; the suffix grows until unique or the name cap is hit, after
/// which the stale entry is dropped and a direct create is attempted.
fn create_symlink_over(target: &Path, link: &Path) -> Result<()> {
    if let Ok(meta) = std::fs::symlink_metadata(link) {
        if !meta.file_type().is_symlink() {
            return Err(CarrierError::SymlinkCollision {
                path: link.to_path_buf(),
            });
        }
    }

    let mut tmp = link.as_os_str().to_os_string();
    loop {
        let tmp_path = PathBuf::from(&tmp);
        match symlink(target, &tmp_path) {
            Ok(()) => {
                if tmp_path != link {
                    std::fs::rename(&tmp_path, link).map_err(|e| CarrierError::SymlinkCreate {
                        link: link.to_path_buf(),
                        target: target.to_path_buf(),
                        source: e,
                    })?;
                }
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tmp.push("@");
                if tmp.len() > SYMLINK_TMP_NAME_CAP {
                    warn!(link = %link.display(), "symlink name cap hit, replacing directly");
                    let _ = std::fs::remove_file(link);
                    return symlink(target, link).map_err(|e| CarrierError::SymlinkCreate {
                        link: link.to_path_buf(),
                        target: target.to_path_buf(),
                        source: e,
                    });
                }
            }
            Err(e) => {
                return Err(CarrierError::SymlinkCreate {
                    link: link.to_path_buf(),
                    target: target.to_path_buf(),
                    source: e,
                })
            }
        }
    }
}
