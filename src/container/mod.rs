//! Container Module
//!
//! Self-describing container files. One container holds every entry of one
//! timespan: raw waveforms keyed by channel, or correlations keyed by
//! station pair. Entries are immutable once committed; appends rewrite the
//! container through a temporary file and an atomic rename.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (31 bytes)                                       │
//! │   Magic: "NSWC" (4) | Version: u16 (2) | Kind: u8 (1)   │
//! │   Start: i64 µs (8) | End: i64 µs (8) | Count: u64 (8)  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable, sorted by key)                    │
//! │   [KeyLen: u32][PayloadLen: u32][CRC: u32][Key][Payload]│
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                  │
//! │   [KeyLen: u32][Offset: u64][Key]                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 (8) | DataCRC: u32 (4) | Padding (4) │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod reader;
mod writer;

use std::path::{Path, PathBuf};

pub use builder::ContainerBuilder;
pub use reader::ContainerReader;
pub use writer::{check_no_pending_write, pending_writes, write_container, WriteLock};

use crate::error::{Result, StoreError};
use crate::timespan::Timespan;

// =============================================================================
// Shared Constants (used by builder, reader, writer)
// =============================================================================

/// Magic bytes identifying a container file
pub(crate) const MAGIC: &[u8; 4] = b"NSWC";

/// Current container format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Kind (1) + Start (8) + End (8) + Count (8)
pub(crate) const HEADER_SIZE: u64 = 31;

/// Offset of the entry count inside the header
pub(crate) const COUNT_OFFSET: u64 = 23;

/// Footer size: IndexOffset (8) + DataCRC (4) + Padding (4)
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Per-entry header: KeyLen (4) + PayloadLen (4) + CRC (4)
pub(crate) const ENTRY_HEADER_SIZE: u64 = 12;

/// File extension of committed containers
pub const CONTAINER_EXTENSION: &str = "wfc";

/// Suffix of the marker file held while a container is being rewritten
pub const LOCK_SUFFIX: &str = "lock";

/// Suffix of the staging file a rewrite goes through
pub const TEMP_SUFFIX: &str = "tmp";

/// What a container's payloads hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContainerKind {
    /// Raw waveform records keyed by channel id
    Waveform = 1,
    /// Cross-correlation records keyed by station pair and component pair
    Correlation = 2,
}

impl ContainerKind {
    pub(crate) fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(ContainerKind::Waveform),
            2 => Ok(ContainerKind::Correlation),
            other => Err(StoreError::CorruptData(format!(
                "unknown container kind {}",
                other
            ))),
        }
    }
}

/// Summary of a committed container
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub path: PathBuf,
    pub kind: ContainerKind,
    pub timespan: Timespan,
    pub entry_count: u64,
    pub file_size: u64,
}

// =============================================================================
// Path Helpers
// =============================================================================

/// `{dir}/{timespan name}.wfc`
pub fn container_path(dir: &Path, timespan: &Timespan) -> PathBuf {
    dir.join(format!("{}.{}", timespan.name(), CONTAINER_EXTENSION))
}

/// `{container}.lock`
pub fn lock_path(container: &Path) -> PathBuf {
    with_suffix(container, LOCK_SUFFIX)
}

/// `{container}.tmp`
pub fn temp_path(container: &Path) -> PathBuf {
    with_suffix(container, TEMP_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Whether a path names a committed container
pub fn is_container(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map_or(false, |ext| ext == CONTAINER_EXTENSION)
}

/// Committed containers directly under `dir`, sorted by path
pub fn list_containers(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    if !dir.is_dir() {
        return Ok(paths);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if is_container(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
