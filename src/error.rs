//! Centralized error types for the carrier
//!
//! All carrier errors are represented by the `CarrierError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, CarrierError>`.

use std::fmt;
use std::path::PathBuf;

use crate::registry::DestKey;

/// All carrier errors
#[derive(Debug)]
pub enum CarrierError {
    // === Config ===
    /// Failed to read config file
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse config file
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Network ===
    /// Failed to bind the main listener
    ListenBind {
        addr: String,
        source: std::io::Error,
    },
    /// Failed to bind the debug listener
    DebugBind {
        addr: String,
        source: std::io::Error,
    },
    /// Failed to read a header line from a connection
    HeaderRead {
        peer: String,
        source: std::io::Error,
    },
    /// Connection produced no header within the read deadline
    HeaderTimeout { peer: String },
    /// Header line did not parse as a known command
    HeaderMalformed { line: String, reason: &'static str },

    // === Dump ===
    /// Connection closed before `size` payload bytes arrived
    DumpShortRead {
        key: DestKey,
        expected: u64,
        got: u64,
    },
    /// I/O failure while streaming payload into a destination
    DumpIo {
        key: DestKey,
        source: std::io::Error,
    },
    /// Destination lock not obtained within WaitTimeout
    AcquireTimeout { key: DestKey },
    /// I/O failure while flushing a destination's stack
    Flush {
        key: DestKey,
        source: std::io::Error,
    },

    // === Files ===
    /// Failed to open or create a live file
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },
    /// I/O failure on an open file handle
    FileIo {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Symlink location is occupied by something that is not a symlink
    SymlinkCollision { path: PathBuf },
    /// Failed to create a symlink
    SymlinkCreate {
        link: PathBuf,
        target: PathBuf,
        source: std::io::Error,
    },
    /// Failed to remove the live symlink before rotation
    SymlinkRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Rotation ===
    /// Live file vanished before rotation
    RotateMissingSource { path: PathBuf },
    /// Rotation target already exists
    RotateTargetExists { path: PathBuf },
    /// Rotation requested while the descriptor is still open
    RotateOpenHandle { path: PathBuf },
    /// Rename of live file into its rotation target failed
    RotateRename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    // === Notifiers ===
    /// Notifier command could not be spawned
    NotifierSpawn {
        command: String,
        source: std::io::Error,
    },
    /// Notifier command exited with a failure status
    NotifierFailure {
        command: String,
        path: PathBuf,
        code: Option<i32>,
    },

    // === Persisted state ===
    /// Failed to read or write the state file
    StateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// State blob is truncated or malformed
    StateParse { reason: String },
    /// State blob carries an unsupported version
    StateVersion { found: u16 },
    /// State entry was dumped by a different bufferer variant
    StateVariantMismatch { key: DestKey },
}

impl std::error::Error for CarrierError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigRead { source, .. }
            | Self::ListenBind { source, .. }
            | Self::DebugBind { source, .. }
            | Self::HeaderRead { source, .. }
            | Self::DumpIo { source, .. }
            | Self::Flush { source, .. }
            | Self::FileOpen { source, .. }
            | Self::FileIo { source, .. }
            | Self::SymlinkCreate { source, .. }
            | Self::SymlinkRemove { source, .. }
            | Self::RotateRename { source, .. }
            | Self::NotifierSpawn { source, .. }
            | Self::StateFile { source, .. } => Some(source),
            Self::ConfigParse { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for CarrierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigRead { path, .. } => {
                write!(f, "Cannot read config: {}", path.display())
            }
            Self::ConfigParse { path, source } => {
                write!(f, "Cannot parse config {}: {}", path.display(), source)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::ListenBind { addr, .. } => write!(f, "Cannot listen on {}", addr),
            Self::DebugBind { addr, .. } => write!(f, "Cannot bind debug listener on {}", addr),
            Self::HeaderRead { peer, .. } => {
                write!(f, "Failed to receive header from {}", peer)
            }
            Self::HeaderTimeout { peer } => {
                write!(f, "Got no header from {} within the deadline", peer)
            }
            Self::HeaderMalformed { line, reason } => {
                write!(f, "Failed to parse header `{}`: {}", line.trim_end(), reason)
            }
            Self::DumpShortRead { key, expected, got } => {
                write!(
                    f,
                    "Short payload for {}: expected {} bytes, got {}",
                    key, expected, got
                )
            }
            Self::DumpIo { key, .. } => write!(f, "Dump into {} failed", key),
            Self::Flush { key, .. } => write!(f, "Flush of {} failed", key),
            Self::AcquireTimeout { key } => {
                write!(f, "Timed out waiting for destination {}", key)
            }
            Self::FileOpen { path, .. } => write!(f, "Cannot open file {}", path.display()),
            Self::FileIo { path, .. } => write!(f, "I/O error on {}", path.display()),
            Self::SymlinkCollision { path } => {
                write!(f, "File `{}` exists and it is not a link", path.display())
            }
            Self::SymlinkCreate { link, target, .. } => {
                write!(
                    f,
                    "Cannot create symlink {} => {}",
                    link.display(),
                    target.display()
                )
            }
            Self::SymlinkRemove { path, .. } => {
                write!(f, "Cannot remove symlink {}", path.display())
            }
            Self::RotateMissingSource { path } => {
                write!(f, "Cannot rename file {}: file not exists", path.display())
            }
            Self::RotateTargetExists { path } => {
                write!(f, "Cannot rotate into {}: file exists", path.display())
            }
            Self::RotateOpenHandle { path } => {
                write!(
                    f,
                    "File {} must be closed before log rotation",
                    path.display()
                )
            }
            Self::RotateRename { from, to, .. } => {
                write!(
                    f,
                    "Cannot rename file {} => {}",
                    from.display(),
                    to.display()
                )
            }
            Self::NotifierSpawn { command, .. } => {
                write!(f, "Cannot run notifier `{}`", command)
            }
            Self::NotifierFailure {
                command,
                path,
                code,
            } => match code {
                Some(code) => write!(
                    f,
                    "Notifier `{}` failed on {} with status {}",
                    command,
                    path.display(),
                    code
                ),
                None => write!(
                    f,
                    "Notifier `{}` killed by signal on {}",
                    command,
                    path.display()
                ),
            },
            Self::StateFile { path, .. } => {
                write!(f, "Cannot access state file {}", path.display())
            }
            Self::StateParse { reason } => write!(f, "Malformed state blob: {}", reason),
            Self::StateVersion { found } => {
                write!(f, "Unsupported state version {}", found)
            }
            Self::StateVariantMismatch { key } => {
                write!(f, "State for {} was saved by a different bufferer kind", key)
            }
        }
    }
}

/// Alias for Result with CarrierError
pub type Result<T> = std::result::Result<T, CarrierError>;
