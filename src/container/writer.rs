//! Container commit protocol
//!
//! A rewrite takes a marker lock (`<container>.lock`, created exclusively),
//! stages the new contents in `<container>.tmp`, fsyncs, and renames over the
//! container. A failure at any step leaves the committed container untouched.
//! A lock or staging file found on open means another writer is active or
//! died mid-write; both surface as `ConcurrentWrite`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::timespan::Timespan;

use super::{
    lock_path, temp_path, ContainerBuilder, ContainerInfo, ContainerKind, CONTAINER_EXTENSION,
    LOCK_SUFFIX, TEMP_SUFFIX,
};

/// Exclusive marker held for the duration of one container rewrite.
/// Dropping it removes the marker.
#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    /// Create the marker, failing with `ConcurrentWrite` if it already exists
    pub fn acquire(container: &Path) -> Result<Self> {
        let path = lock_path(container);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::ConcurrentWrite(format!(
                    "{} is locked by another writer ({} exists)",
                    container.display(),
                    path.display()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release write lock");
        }
    }
}

/// Fail with `ConcurrentWrite` if a rewrite of `container` is in progress or
/// was abandoned
pub fn check_no_pending_write(container: &Path) -> Result<()> {
    for marker in [lock_path(container), temp_path(container)] {
        if marker.exists() {
            return Err(StoreError::ConcurrentWrite(format!(
                "{} has an unfinished write ({} exists)",
                container.display(),
                marker.display()
            )));
        }
    }
    Ok(())
}

/// Lock or staging files directly under `dir`, including those of containers
/// that were never committed
pub fn pending_writes(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pending = Vec::new();
    if !dir.is_dir() {
        return Ok(pending);
    }
    let lock_suffix = format!(".{}.{}", CONTAINER_EXTENSION, LOCK_SUFFIX);
    let temp_suffix = format!(".{}.{}", CONTAINER_EXTENSION, TEMP_SUFFIX);
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        if let Some(name) = name {
            if name.ends_with(&lock_suffix) || name.ends_with(&temp_suffix) {
                pending.push(path);
            }
        }
    }
    pending.sort();
    Ok(pending)
}

/// Atomically replace (or create) `path` with exactly `entries`.
///
/// The caller must hold the container's [`WriteLock`].
pub fn write_container(
    path: &Path,
    kind: ContainerKind,
    timespan: &Timespan,
    entries: &BTreeMap<String, Vec<u8>>,
) -> Result<ContainerInfo> {
    let staging = temp_path(path);

    let staged = (|| {
        let mut builder = ContainerBuilder::new(&staging, kind, timespan)?;
        for (key, payload) in entries {
            builder.add(key, payload)?;
        }
        builder.finish()
    })();

    let mut info = match staged {
        Ok(info) => info,
        Err(e) => {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    sync_parent(path);

    debug!(
        container = %path.display(),
        entries = info.entry_count,
        bytes = info.file_size,
        "Committed container"
    );
    info.path = path.to_path_buf();
    Ok(info)
}

/// Persist the rename; not every platform can open a directory for sync
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}
