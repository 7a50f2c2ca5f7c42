//! Container Reader
//!
//! Opens a container, validates its header and footer, and keeps the index in
//! memory for O(log n) lookups. The file handle sits behind a mutex so lookups
//! take `&self` and many threads can share one reader.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::timespan::Timespan;

use super::builder::entry_crc;
use super::{ContainerKind, ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Reader for container files
pub struct ContainerReader {
    path: PathBuf,
    kind: ContainerKind,
    timespan: Timespan,
    /// In-memory index: key → file offset
    index: BTreeMap<String, u64>,
    /// Start of the index block (end of data)
    index_offset: u64,
    /// Checksum of the whole data block, from the footer
    data_crc: u32,
    file: Mutex<BufReader<File>>,
}

impl ContainerReader {
    /// Open a container and load its index
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::DataNotFound(path.display().to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        let file_size = file.metadata()?.len();
        let corrupt = |msg: String| StoreError::CorruptData(format!("{}: {}", path.display(), msg));

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(format!("file too short ({} bytes)", file_size)));
        }

        // Header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(corrupt(format!(
                "invalid magic: expected NSWC, got {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(corrupt(format!("unsupported container version {}", version)));
        }

        let kind = ContainerKind::from_byte(header[6]).map_err(|e| corrupt(e.to_string()))?;
        let start = i64::from_le_bytes(le_array(&header[7..15]));
        let end = i64::from_le_bytes(le_array(&header[15..23]));
        let entry_count = u64::from_le_bytes(le_array(&header[23..31]));
        let timespan = Timespan::from_micros(start, end)
            .map_err(|e| corrupt(format!("bad header timespan: {}", e)))?;

        // Footer
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = u64::from_le_bytes(le_array(&footer[0..8]));
        let data_crc = u32::from_le_bytes(le_array(&footer[8..12]));
        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(corrupt(format!("index offset {} out of bounds", index_offset)));
        }

        // Index block: [key_len(4)][offset(8)][key]
        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
        file.read_exact(&mut index_data)?;

        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos < index_data.len() {
            if pos + 12 > index_data.len() {
                return Err(corrupt("truncated index entry".to_string()));
            }
            let key_len = u32::from_le_bytes(le_array(&index_data[pos..pos + 4])) as usize;
            let offset = u64::from_le_bytes(le_array(&index_data[pos + 4..pos + 12]));
            pos += 12;

            if pos + key_len > index_data.len() {
                return Err(corrupt("truncated index key".to_string()));
            }
            let key = String::from_utf8(index_data[pos..pos + key_len].to_vec())
                .map_err(|_| corrupt("index key is not UTF-8".to_string()))?;
            pos += key_len;

            if offset < HEADER_SIZE || offset >= index_offset {
                return Err(corrupt(format!("entry offset {} out of bounds", offset)));
            }
            index.insert(key, offset);
        }

        if index.len() as u64 != entry_count {
            return Err(corrupt(format!(
                "header says {} entries, index has {}",
                entry_count,
                index.len()
            )));
        }

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            timespan,
            index,
            index_offset,
            data_crc,
            file: Mutex::new(BufReader::new(file)),
        })
    }

    /// Payload stored under `key`, checksum-verified
    ///
    /// - `DataNotFound` if the key is not indexed
    /// - `CorruptData` if the entry cannot be read back intact
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let offset = *self.index.get(key).ok_or_else(|| {
            StoreError::DataNotFound(format!("{} in {}", key, self.path.display()))
        })?;

        let mut file = self.file.lock();
        let (stored_key, payload) = read_entry(&mut file, offset, self.index_offset)
            .map_err(|e| self.as_corrupt(key, e))?;

        if stored_key != key {
            return Err(StoreError::CorruptData(format!(
                "{}: index points '{}' at entry '{}'",
                self.path.display(),
                key,
                stored_key
            )));
        }
        Ok(payload)
    }

    /// Every (key, payload) in key order
    pub fn entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.index
            .keys()
            .map(|key| self.get(key).map(|payload| (key.clone(), payload)))
            .collect()
    }

    /// Recompute the data-block checksum against the footer
    pub fn verify(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut data = vec![0u8; (self.index_offset - HEADER_SIZE) as usize];
        file.read_exact(&mut data)?;
        let actual = crc32fast::hash(&data);
        if actual != self.data_crc {
            return Err(StoreError::CorruptData(format!(
                "{}: data checksum mismatch (expected {:08x}, got {:08x})",
                self.path.display(),
                self.data_crc,
                actual
            )));
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn timespan(&self) -> &Timespan {
        &self.timespan
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn as_corrupt(&self, key: &str, e: StoreError) -> StoreError {
        match e {
            StoreError::Io(io) => StoreError::CorruptData(format!(
                "{}: cannot read entry '{}': {}",
                self.path.display(),
                key,
                io
            )),
            other => other,
        }
    }
}

/// Read one data-block entry at `offset`
fn read_entry(
    file: &mut BufReader<File>,
    offset: u64,
    data_end: u64,
) -> Result<(String, Vec<u8>)> {
    file.seek(SeekFrom::Start(offset))?;

    let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
    file.read_exact(&mut header)?;

    let key_len = u32::from_le_bytes(le_array(&header[0..4])) as u64;
    let payload_len = u32::from_le_bytes(le_array(&header[4..8])) as u64;
    let crc = u32::from_le_bytes(le_array(&header[8..12]));

    if offset + ENTRY_HEADER_SIZE + key_len + payload_len > data_end {
        return Err(StoreError::CorruptData(format!(
            "entry at {} runs past the data block",
            offset
        )));
    }

    let mut key = vec![0u8; key_len as usize];
    file.read_exact(&mut key)?;
    let mut payload = vec![0u8; payload_len as usize];
    file.read_exact(&mut payload)?;

    if entry_crc(&key, &payload) != crc {
        return Err(StoreError::CorruptData(format!(
            "checksum mismatch for entry at {}",
            offset
        )));
    }

    let key = String::from_utf8(key)
        .map_err(|_| StoreError::CorruptData(format!("entry key at {} is not UTF-8", offset)))?;
    Ok((key, payload))
}

/// Copy a slice of known length into a fixed array
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
