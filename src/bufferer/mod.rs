//! Layered write stacks for destinations
//!
//! A bufferer turns arriving payload bytes into durable, optionally
//! compressed file content. Two variants share one contract:
//!
//! - **raw**: input buffer → file
//! - **zstd**: input buffer → zstd encoder → frame buffer → file
//!
//! Data flows top-down; state capture for crash recovery happens in the same
//! top-down order so that truncating the file to its recorded offset undoes
//! partially-written frames consistently.

pub mod frame;
pub mod input;
pub mod raw;
pub mod zstd;

use std::io;
use std::sync::Arc;

use crate::config::{CompressionMethod, Config};
use crate::error::Result;
use crate::fileio::FileHandle;
use crate::notify::NotifySet;
use crate::paths::PathGen;
use crate::registry::DestKey;
use crate::state::{StateReader, StateVariant, StateWriter};

pub use raw::RawBufferer;
pub use zstd::ZstdBufferer;

/// Common contract of the raw and compressed write stacks
pub trait Bufferer: Send {
    /// Appends payload bytes to the input buffer
    fn write(&mut self, p: &[u8]) -> io::Result<()>;

    /// Runs after a whole message was written; drains an overgrown input
    /// buffer downstream
    fn post_write(&mut self) -> io::Result<()>;

    /// Periodic flush driven by the background ticker
    fn flush(&mut self) -> io::Result<()>;

    /// Drains every layer and releases the file descriptor
    fn close(&mut self) -> Result<()>;

    /// Renames the live file into its rotation target; `close` must have run
    fn rotate(&mut self) -> Result<()>;

    /// Which stack shape produced this bufferer's state blobs
    fn variant(&self) -> StateVariant;

    /// Captures layer positions top-down into the state blob
    fn dump_state(&mut self, w: &mut StateWriter) -> Result<()>;

    /// Restores layer positions in the same top-down order
    fn restore_state(&mut self, r: &mut StateReader<'_>) -> Result<()>;
}

/// Builds the bufferer for a destination on first use
///
/// The factory encodes the raw-vs-compressed choice and all size parameters;
/// the registry only ever sees the trait object.
pub type BuffererFactory = Arc<dyn Fn(&DestKey) -> Result<Box<dyn Bufferer>> + Send + Sync>;

/// Assembles the factory from config, path generators and notifiers
pub fn make_factory(
    cfg: &Config,
    namegen: Arc<PathGen>,
    linkgen: Arc<PathGen>,
    notifiers: Arc<NotifySet>,
) -> BuffererFactory {
    let input_size = cfg.buffers.input;
    let framing_size = cfg.buffers.framing;
    let level = cfg.compression.level;
    let method = cfg.compression.method;
    let dirmode = cfg.files.dirmode();

    Arc::new(move |key: &DestKey| {
        let file = FileHandle::open(
            &key.dir,
            &key.name,
            &key.group,
            namegen.clone(),
            linkgen.clone(),
            dirmode,
            notifiers.clone(),
        )?;
        match method {
            CompressionMethod::Raw => Ok(Box::new(RawBufferer::new(input_size, file)) as Box<dyn Bufferer>),
            CompressionMethod::ZStd => {
                let path = file.live_path().to_path_buf();
                let b = ZstdBufferer::new(input_size, framing_size, level, file)
                    .map_err(|e| crate::error::CarrierError::FileIo { path, source: e })?;
                Ok(Box::new(b) as Box<dyn Bufferer>)
            }
        }
    })
}
