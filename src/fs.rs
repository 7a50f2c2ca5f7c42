//! Filesystem capability
//!
//! The minimal surface the stores need (join, glob, exists, read, byte-range
//! read, list) so the same store code can address a local disk or a remote
//! object store. Paths are `/`-separated strings on every implementation.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use bytes::Bytes;

use crate::error::{Result, StoreError};

/// Read-side filesystem operations used by the stores and the selector
pub trait FileSystem: Send + Sync {
    /// Join a base path and a relative part
    fn join(&self, base: &str, part: &str) -> String {
        if base.is_empty() {
            part.to_string()
        } else if base.ends_with('/') {
            format!("{}{}", base, part)
        } else {
            format!("{}/{}", base, part)
        }
    }

    /// Entry names (not full paths) directly under `dir`, sorted.
    /// A missing directory yields an empty list.
    fn list_dir(&self, dir: &str) -> Result<Vec<String>>;

    /// Full paths under `dir` whose file name matches `pattern` (`*`, `?`)
    fn glob(&self, dir: &str, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .list_dir(dir)?
            .into_iter()
            .filter(|name| wildcard_match(pattern, name))
            .map(|name| self.join(dir, &name))
            .collect())
    }

    fn exists(&self, path: &str) -> bool;

    /// Whole object. Missing → `DataNotFound`; network trouble → `TransientFetch`.
    fn read(&self, path: &str) -> Result<Bytes>;

    /// Byte range of an object
    fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes>;
}

/// Local disk implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn read(&self, path: &str) -> Result<Bytes> {
        std::fs::read(path)
            .map(Bytes::from)
            .map_err(|e| not_found_or_io(path, e))
    }

    fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes> {
        if range.end < range.start {
            return Err(StoreError::Configuration(format!(
                "invalid byte range {}..{} for {}",
                range.start, range.end, path
            )));
        }
        let mut file = File::open(path).map_err(|e| not_found_or_io(path, e))?;
        file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                StoreError::DataNotFound(format!(
                    "{}: range {}..{} beyond end of object",
                    path, range.start, range.end
                ))
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(Bytes::from(buf))
    }
}

fn not_found_or_io(path: &str, e: std::io::Error) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::DataNotFound(path.to_string())
    } else {
        StoreError::Io(e)
    }
}

/// Shell-style match of a whole file name: `*` any run, `?` one character
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ni));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ni = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
