//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

use std::time::Duration;

// =============================================================================
// Wire protocol
// =============================================================================

/// Successful DATA response
pub const RESP_OK: &[u8] = b"200 OK\n";

/// Successful ROTATE response
pub const RESP_DONE: &[u8] = b"200 DONE\n";

/// Any failure response
pub const RESP_ERROR: &[u8] = b"400 Error\n";

/// Idle deadline applied to every read off a client connection
pub const CONN_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest header line the router accepts
pub const HEADER_MAX_LEN: usize = 1024;

// =============================================================================
// Dump pipeline
// =============================================================================

/// Read chunk size when streaming payload bytes into a destination
pub const DUMP_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Symlinks
// =============================================================================

/// Cap on the suffixed temporary link name during two-phase symlink creation
pub const SYMLINK_TMP_NAME_CAP: usize = 1000;

// =============================================================================
// Debug endpoint
// =============================================================================

/// Largest request the debug endpoint reads from one connection
pub const DEBUG_REQUEST_MAX: usize = 4096;
