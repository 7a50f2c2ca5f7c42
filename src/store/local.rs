//! Local container-file backend
//!
//! One container per timespan under a single directory. Each channel takes
//! two entries in its container: `channel/<id>` (metadata, small) and
//! `waveform/<id>` (samples). The index is built at open from the metadata
//! entries only; this instance's own appends update it, other writers' do not.
//!
//! ## Concurrency
//! - `index`: RwLock, many readers, updated only by this instance's appends
//! - `write_lock`: serializes `append_data` within the instance
//! - across processes: per-container [`WriteLock`] marker files

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Span};

use crate::catalog::{Channel, ChannelId};
use crate::container::{
    check_no_pending_write, container_path, list_containers, pending_writes, write_container,
    ContainerKind, ContainerReader, WriteLock,
};
use crate::error::{Result, StoreError};
use crate::timespan::Timespan;

use super::{validate_sample_count, AppendOutcome, ChannelData, RawDataStore, RawDataWriter};

const CHANNEL_PREFIX: &str = "channel/";
const WAVEFORM_PREFIX: &str = "waveform/";

/// Samples as persisted in a `waveform/` entry
#[derive(Debug, Serialize, Deserialize)]
struct WaveformRecord {
    sampling_rate: f64,
    start_timestamp: f64,
    samples: Vec<f32>,
}

/// One indexed container
struct IndexedContainer {
    reader: Arc<ContainerReader>,
    /// Channels in the container, ordered by id
    channels: Vec<Channel>,
}

/// Read-write store over local container files
pub struct ContainerRawDataStore {
    root: PathBuf,
    index: RwLock<BTreeMap<Timespan, IndexedContainer>>,
    write_lock: Mutex<()>,
    span: Span,
}

impl ContainerRawDataStore {
    /// Open (creating if needed) a container directory and index it.
    ///
    /// Fails with `ConcurrentWrite` if any container has an unfinished
    /// rewrite, and with `CorruptData` if a container cannot be indexed.
    pub fn open(root: &Path) -> Result<Self> {
        let span = info_span!("raw_store", backend = "container", root = %root.display());
        let _enter = span.enter();

        fs::create_dir_all(root)?;

        if let Some(pending) = pending_writes(root)?.first() {
            return Err(StoreError::ConcurrentWrite(format!(
                "unfinished write in {}: {}",
                root.display(),
                pending.display()
            )));
        }

        let mut index = BTreeMap::new();
        for path in list_containers(root)? {
            check_no_pending_write(&path)?;
            let container = Self::index_container(&path)?;
            let timespan = *container.reader.timespan();
            if let Some(previous) = index.insert(timespan, container) {
                return Err(StoreError::CorruptData(format!(
                    "{} and {} both hold timespan {}",
                    previous.reader.path().display(),
                    path.display(),
                    timespan
                )));
            }
        }

        info!(containers = index.len(), "Opened container store");
        drop(_enter);

        Ok(Self {
            root: root.to_path_buf(),
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
            span,
        })
    }

    /// Replace the default observability span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of indexed containers (including empty ones)
    pub fn container_count(&self) -> usize {
        self.index.read().len()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn index_container(path: &Path) -> Result<IndexedContainer> {
        let reader = ContainerReader::open(path)?;
        if reader.kind() != ContainerKind::Waveform {
            return Err(StoreError::CorruptData(format!(
                "{} is not a waveform container",
                path.display()
            )));
        }

        let mut channels = Vec::new();
        let keys: Vec<String> = reader
            .keys()
            .filter(|k| k.starts_with(CHANNEL_PREFIX))
            .map(str::to_string)
            .collect();
        for key in keys {
            let channel: Channel = bincode::deserialize(&reader.get(&key)?).map_err(|e| {
                StoreError::CorruptData(format!("{}: bad entry '{}': {}", path.display(), key, e))
            })?;
            channels.push(channel);
        }
        debug!(container = %path.display(), channels = channels.len(), "Indexed container");

        Ok(IndexedContainer {
            reader: Arc::new(reader),
            channels,
        })
    }

    fn channel_key(id: &ChannelId) -> String {
        format!("{}{}", CHANNEL_PREFIX, id)
    }

    fn waveform_key(id: &ChannelId) -> String {
        format!("{}{}", WAVEFORM_PREFIX, id)
    }

    fn reader_for(&self, timespan: &Timespan) -> Result<Arc<ContainerReader>> {
        self.index
            .read()
            .get(timespan)
            .map(|c| Arc::clone(&c.reader))
            .ok_or_else(|| StoreError::DataNotFound(format!("timespan {}", timespan)))
    }
}

impl RawDataStore for ContainerRawDataStore {
    fn get_timespans(&self) -> Result<Vec<Timespan>> {
        Ok(self
            .index
            .read()
            .iter()
            .filter(|(_, c)| !c.channels.is_empty())
            .map(|(ts, _)| *ts)
            .collect())
    }

    fn get_channels(&self, timespan: &Timespan) -> Result<Vec<Channel>> {
        self.index
            .read()
            .get(timespan)
            .filter(|c| !c.channels.is_empty())
            .map(|c| c.channels.clone())
            .ok_or_else(|| StoreError::DataNotFound(format!("timespan {}", timespan)))
    }

    fn read_data(&self, timespan: &Timespan, channel: &Channel) -> Result<ChannelData> {
        let _enter = self.span.enter();
        let reader = self.reader_for(timespan)?;
        let id = channel.id();
        let payload = reader.get(&Self::waveform_key(&id))?;

        let record: WaveformRecord = bincode::deserialize(&payload).map_err(|e| {
            StoreError::CorruptData(format!("{} in {}: undecodable waveform: {}", id, timespan, e))
        })?;
        let data = ChannelData::new(record.samples, record.sampling_rate, record.start_timestamp);
        validate_sample_count(timespan, &data, &format!("{} in {}", id, timespan))?;
        Ok(data)
    }

    fn writer(&self) -> Option<&dyn RawDataWriter> {
        Some(self)
    }

    /// Recompute the data checksum of every indexed container
    fn verify_integrity(&self) -> Result<()> {
        let _enter = self.span.enter();
        for container in self.index.read().values() {
            container.reader.verify()?;
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "container"
    }
}

impl RawDataWriter for ContainerRawDataStore {
    fn append_data(
        &self,
        timespan: &Timespan,
        channel: &Channel,
        data: &ChannelData,
    ) -> Result<AppendOutcome> {
        let _enter = self.span.enter();
        let id = channel.id();
        validate_sample_count(timespan, data, &format!("{} in {}", id, timespan))?;

        let channel_key = Self::channel_key(&id);
        let waveform_key = Self::waveform_key(&id);
        let channel_payload = bincode::serialize(channel)?;
        let waveform_payload = bincode::serialize(&WaveformRecord {
            sampling_rate: data.sampling_rate,
            start_timestamp: data.start_timestamp,
            samples: data.data.clone(),
        })?;

        // Single writer per instance, then per container across processes
        let _write_guard = self.write_lock.lock();
        let path = container_path(&self.root, timespan);
        let _container_lock = WriteLock::acquire(&path)?;
        check_no_pending_write_except_lock(&path)?;

        // Current on-disk contents, which may be newer than our index
        let mut entries: BTreeMap<String, Vec<u8>> = if path.exists() {
            let current = ContainerReader::open(&path)?;
            if current.timespan() != timespan {
                return Err(StoreError::CorruptData(format!(
                    "{} holds {}, expected {}",
                    path.display(),
                    current.timespan(),
                    timespan
                )));
            }
            current.entries()?.into_iter().collect()
        } else {
            BTreeMap::new()
        };

        // Samples decide idempotence; the stored channel record is kept as is
        match (entries.get(&channel_key), entries.get(&waveform_key)) {
            (Some(_), Some(stored_waveform)) => {
                if *stored_waveform == waveform_payload {
                    debug!(channel = %id, timespan = %timespan, "Identical data already stored");
                    return Ok(AppendOutcome::Unchanged);
                }
                return Err(StoreError::DuplicateWrite(format!("{} in {}", id, timespan)));
            }
            (None, None) => {}
            _ => {
                return Err(StoreError::CorruptData(format!(
                    "{}: partial entry for {}",
                    path.display(),
                    id
                )))
            }
        }

        entries.insert(channel_key, channel_payload);
        entries.insert(waveform_key, waveform_payload);
        write_container(&path, ContainerKind::Waveform, timespan, &entries)?;

        let container = Self::index_container(&path)?;
        self.index.write().insert(*timespan, container);

        info!(channel = %id, timespan = %timespan, samples = data.data.len(), "Appended waveform");
        Ok(AppendOutcome::Written)
    }
}

/// Like `check_no_pending_write`, for a caller already holding the lock
fn check_no_pending_write_except_lock(container: &Path) -> Result<()> {
    let staging = crate::container::temp_path(container);
    if staging.exists() {
        return Err(StoreError::ConcurrentWrite(format!(
            "{} has an abandoned staging file {}",
            container.display(),
            staging.display()
        )));
    }
    Ok(())
}
