//! Tabular channel catalog
//!
//! Loads a single delimited `station.txt` once; every lookup afterwards is a
//! map access. Rows carry no validity epochs, so metadata applies at all times.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::fs::{FileSystem, LocalFileSystem};

use super::{Channel, ChannelCatalog, ChannelId, ChannelType, Station, STATION_FILE};

/// One row of the station table. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct StationRow {
    station: String,
    network: String,
    channel: String,
    #[serde(default)]
    location: Option<String>,
    latitude: f64,
    longitude: f64,
    elevation: f64,
}

/// Catalog backed by a delimited station table
pub struct CsvChannelCatalog {
    path: PathBuf,
    channels: BTreeMap<ChannelId, Channel>,
}

impl CsvChannelCatalog {
    /// Load a catalog from a table file, or from `station.txt` inside a directory
    pub fn open(path: &Path) -> Result<Self> {
        let path = if path.is_dir() {
            path.join(STATION_FILE)
        } else {
            path.to_path_buf()
        };
        if !path.is_file() {
            return Err(StoreError::Configuration(format!(
                "station table {} does not exist",
                path.display()
            )));
        }
        Self::open_with(&LocalFileSystem::new(), &path.to_string_lossy())
    }

    /// Load through a [`FileSystem`]; `path` is the table or its directory
    pub fn open_with(fs: &dyn FileSystem, path: &str) -> Result<Self> {
        let in_dir = fs.join(path, STATION_FILE);
        let path = if fs.exists(&in_dir) {
            in_dir
        } else {
            path.to_string()
        };
        let bytes = fs.read(&path).map_err(|e| match e {
            StoreError::DataNotFound(_) => {
                StoreError::Configuration(format!("station table {} does not exist", path))
            }
            other => other,
        })?;
        let channels = Self::parse(&bytes).map_err(|e| match e {
            StoreError::Configuration(msg) => {
                StoreError::Configuration(format!("{}: {}", path, msg))
            }
            other => other,
        })?;
        debug!(path = %path, channels = channels.len(), "Loaded station table");
        Ok(Self {
            path: PathBuf::from(path),
            channels,
        })
    }

    /// Parse table contents (comma separated, header row required)
    pub fn from_reader<R: std::io::Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self {
            path: PathBuf::new(),
            channels: Self::parse(&bytes)?,
        })
    }

    fn parse(bytes: &[u8]) -> Result<BTreeMap<ChannelId, Channel>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(bytes);

        let mut channels = BTreeMap::new();
        for (line, row) in reader.deserialize::<StationRow>().enumerate() {
            let row = row.map_err(|e| {
                StoreError::Configuration(format!("bad station row {}: {}", line + 1, e))
            })?;
            let location = match row.location.as_deref() {
                None | Some("--") => String::new(),
                Some(loc) => loc.to_string(),
            };
            let channel = Channel::new(
                Station {
                    network: row.network,
                    name: row.station,
                    location: location.clone(),
                    latitude: row.latitude,
                    longitude: row.longitude,
                    elevation: row.elevation,
                },
                ChannelType::new(row.channel, location),
            );
            let id = channel.id();
            if channels.insert(id.clone(), channel).is_some() {
                return Err(StoreError::Configuration(format!(
                    "duplicate station row for {}",
                    id
                )));
            }
        }
        Ok(channels)
    }

    /// Source file (empty when built from a reader)
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl ChannelCatalog for CsvChannelCatalog {
    fn get_channel_metadata(&self, id: &ChannelId, at: DateTime<Utc>) -> Result<Channel> {
        self.channels
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownChannel {
                channel: id.to_string(),
                at: at.to_rfc3339(),
            })
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.channels.values().cloned().collect())
    }
}
