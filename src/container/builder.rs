//! Container Builder
//!
//! Writes sorted entries to a new container file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::timespan::Timespan;

use super::{
    ContainerInfo, ContainerKind, COUNT_OFFSET, ENTRY_HEADER_SIZE, HEADER_SIZE, MAGIC, VERSION,
};

/// Builder for a container; `add()` in strictly increasing key order, then `finish()`
pub struct ContainerBuilder {
    /// Output file path
    path: PathBuf,
    kind: ContainerKind,
    timespan: Timespan,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Number of entries written
    entry_count: u64,
    /// Current write position (for index)
    current_offset: u64,
    /// Index: key → file offset of entry
    index: Vec<(String, u64)>,
    /// Running CRC hasher for the data block
    data_hasher: crc32fast::Hasher,
}

impl ContainerBuilder {
    /// Create the file and write its header immediately
    pub fn new(path: &Path, kind: ContainerKind, timespan: &Timespan) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&[kind as u8])?;
        writer.write_all(&timespan.start_micros().to_le_bytes())?;
        writer.write_all(&timespan.end_micros().to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?; // Entry count, patched in finish

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            timespan: *timespan,
            writer,
            entry_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append one entry. Keys must be strictly increasing.
    pub fn add(&mut self, key: &str, payload: &[u8]) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if key <= last.as_str() {
                return Err(StoreError::Serialization(format!(
                    "container keys out of order: '{}' after '{}'",
                    key, last
                )));
            }
        }
        let key_len = u32::try_from(key.len())
            .map_err(|_| StoreError::Serialization(format!("key too long: {}", key.len())))?;
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            StoreError::Serialization(format!("payload too large for '{}': {}", key, payload.len()))
        })?;

        self.index.push((key.to_string(), self.current_offset));

        let crc = entry_crc(key.as_bytes(), payload);
        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&key_len.to_le_bytes());
        header[4..8].copy_from_slice(&payload_len.to_le_bytes());
        header[8..12].copy_from_slice(&crc.to_le_bytes());

        self.writer.write_all(&header)?;
        self.writer.write_all(key.as_bytes())?;
        self.writer.write_all(payload)?;

        self.data_hasher.update(&header);
        self.data_hasher.update(key.as_bytes());
        self.data_hasher.update(payload);

        self.current_offset += ENTRY_HEADER_SIZE + key.len() as u64 + payload.len() as u64;
        self.entry_count += 1;

        Ok(())
    }

    /// Write index block and footer, patch the entry count, fsync
    pub fn finish(mut self) -> Result<ContainerInfo> {
        let index_offset = self.current_offset;

        for (key, offset) in &self.index {
            let key_len = key.len() as u32;
            self.writer.write_all(&key_len.to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key.as_bytes())?;
        }

        let data_crc = self.data_hasher.finalize();

        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?; // Padding for alignment

        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| {
            StoreError::Io(std::io::Error::new(
                e.error().kind(),
                format!("failed to flush container: {}", e),
            ))
        })?;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();

        Ok(ContainerInfo {
            path: self.path,
            kind: self.kind,
            timespan: self.timespan,
            entry_count: self.entry_count,
            file_size,
        })
    }
}

/// Checksum over key and payload of one entry
pub(crate) fn entry_crc(key: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(payload);
    hasher.finalize()
}
