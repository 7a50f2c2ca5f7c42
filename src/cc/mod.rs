//! Cross-Correlation Store
//!
//! Same shape as the raw data store, keyed by
//! `(timespan, station pair, configuration fingerprint)`.
//!
//! ## Layout
//! ```text
//! {ccf_dir}/
//!   ├── fft_cc_data.json               (parameters of the last read-write open)
//!   └── {fingerprint}/
//!         ├── params.json              (parameters for this fingerprint)
//!         └── {timespan}.wfc           (one container per timespan)
//! ```
//!
//! Each container entry holds one component pair of one station pair, keyed
//! `NET.STA_NET.STA/ZZ`. Writes follow the raw store's contract per entry:
//! identical re-append is a no-op, conflicting data is `DuplicateWrite`, and
//! a failed write leaves the container as it was.
//!
//! Several read-write instances may share one archive as long as they write
//! disjoint timespans. A read-write open therefore tolerates other writers'
//! lock and staging files; the affected container still fails its own
//! append with `ConcurrentWrite`. A read-only open refuses them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Span};

use crate::container::{
    check_no_pending_write, container_path, list_containers, pending_writes, temp_path,
    write_container, ContainerKind, ContainerReader, WriteLock,
};
use crate::error::{Result, StoreError};
use crate::params::{read_metadata, write_metadata, ConfigParameters, FFT_CC_INFO};
use crate::store::AppendOutcome;
use crate::timespan::Timespan;

/// Parameter record kept inside each fingerprint directory
const PARAMS_STEM: &str = "params";

/// Between the station pair and the component pair in an entry key
const COMPONENT_SEPARATOR: char = '/';

/// Whether the store accepts writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Stacking stage
    ReadOnly,
    /// Cross-correlation stage
    ReadWrite,
}

/// Network-qualified station, `NET.STA`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationId {
    pub network: String,
    pub name: String,
}

impl StationId {
    pub fn new(network: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.network, self.name)
    }
}

/// Ordered (source, receiver) pair; `NET.STA_NET.STA`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationPair {
    pub source: StationId,
    pub receiver: StationId,
}

impl StationPair {
    pub fn new(source: StationId, receiver: StationId) -> Self {
        Self { source, receiver }
    }

    /// Container key
    pub fn key(&self) -> String {
        format!("{}_{}", self.source, self.receiver)
    }

    /// Inverse of [`StationPair::key`]
    pub fn parse(key: &str) -> Option<Self> {
        let (source, receiver) = key.split_once('_')?;
        let station = |s: &str| {
            let (network, name) = s.split_once('.')?;
            if network.is_empty() || name.is_empty() || name.contains('.') {
                return None;
            }
            Some(StationId::new(network, name))
        };
        Some(Self::new(station(source)?, station(receiver)?))
    }
}

impl fmt::Display for StationPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Correlation function of one component pair, for one station pair and timespan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCorrelation {
    /// Sampling rate of the correlation functions (Hz)
    pub sampling_rate: f64,
    /// Lag range is `[-max_lag, max_lag]` seconds
    pub max_lag: f64,
    /// Component pair, e.g. `ZZ` or `EN`
    pub components: String,
    pub data: Vec<f32>,
}

/// Correlation archive for one parameter fingerprint
pub struct CcStore {
    root: PathBuf,
    dir: PathBuf,
    mode: StoreMode,
    fingerprint: String,
    index: RwLock<BTreeMap<Timespan, Arc<ContainerReader>>>,
    write_lock: Mutex<()>,
    span: Span,
}

impl CcStore {
    /// Open the store for `params` under `root`.
    ///
    /// `ReadWrite` creates directories and records `params`; `ReadOnly`
    /// requires `root` to exist and indexes whatever the fingerprint holds.
    pub fn open(root: &Path, mode: StoreMode, params: &ConfigParameters) -> Result<Self> {
        let fingerprint = params.fingerprint();
        let span = info_span!("cc_store", root = %root.display(), fingerprint = %fingerprint);
        let _enter = span.enter();
        let dir = root.join(&fingerprint);

        match mode {
            StoreMode::ReadWrite => {
                fs::create_dir_all(&dir)?;
                write_metadata(root, FFT_CC_INFO, params)?;
                write_metadata(&dir, PARAMS_STEM, params)?;
            }
            StoreMode::ReadOnly => {
                if !root.is_dir() {
                    return Err(StoreError::Configuration(format!(
                        "correlation directory {} does not exist",
                        root.display()
                    )));
                }
            }
        }

        let pending = pending_writes(&dir)?;
        match (mode, pending.first()) {
            (StoreMode::ReadOnly, Some(first)) => {
                return Err(StoreError::ConcurrentWrite(format!(
                    "unfinished write in {}: {}",
                    dir.display(),
                    first.display()
                )));
            }
            (StoreMode::ReadWrite, Some(_)) => {
                debug!(pending = pending.len(), "Other writers active in correlation store");
            }
            (_, None) => {}
        }

        let mut index = BTreeMap::new();
        for path in list_containers(&dir)? {
            if mode == StoreMode::ReadOnly {
                check_no_pending_write(&path)?;
            }
            let reader = Self::open_container(&path)?;
            index.insert(*reader.timespan(), Arc::new(reader));
        }

        info!(mode = ?mode, containers = index.len(), "Opened correlation store");
        drop(_enter);

        Ok(Self {
            root: root.to_path_buf(),
            dir,
            mode,
            fingerprint,
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
            span,
        })
    }

    /// Open read-only with the parameters recorded by the correlation stage
    pub fn open_recorded(root: &Path) -> Result<Self> {
        let params = read_metadata(root, FFT_CC_INFO)?.ok_or_else(|| {
            StoreError::Configuration(format!(
                "no {} record in {}",
                FFT_CC_INFO,
                root.display()
            ))
        })?;
        Self::open(root, StoreMode::ReadOnly, &params)
    }

    /// Fingerprints with a directory under `root`
    pub fn fingerprints(root: &Path) -> Result<Vec<String>> {
        let mut found = Vec::new();
        if !root.is_dir() {
            return Ok(found);
        }
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.len() == 8 && name.chars().all(|c| c.is_ascii_hexdigit()) {
                    found.push(name.to_string());
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Replace the default observability span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parameters recorded for this fingerprint
    pub fn parameters(&self) -> Result<Option<ConfigParameters>> {
        read_metadata(&self.dir, PARAMS_STEM)
    }

    /// Timespans with at least one correlation, chronological
    pub fn get_timespans(&self) -> Result<Vec<Timespan>> {
        Ok(self
            .index
            .read()
            .iter()
            .filter(|(_, reader)| !reader.is_empty())
            .map(|(ts, _)| *ts)
            .collect())
    }

    /// Station pairs stored for exactly `timespan`
    pub fn get_station_pairs(&self, timespan: &Timespan) -> Result<Vec<StationPair>> {
        let reader = self.reader_for(timespan)?;
        let mut pairs = BTreeSet::new();
        for key in reader.keys() {
            let (pair, _) = split_entry_key(key).ok_or_else(|| {
                StoreError::CorruptData(format!(
                    "{}: bad correlation key '{}'",
                    reader.path().display(),
                    key
                ))
            })?;
            pairs.insert(pair);
        }
        Ok(pairs.into_iter().collect())
    }

    /// Component pairs stored for `pair` in `timespan`, sorted
    pub fn get_components(&self, timespan: &Timespan, pair: &StationPair) -> Result<Vec<String>> {
        let reader = self.reader_for(timespan)?;
        let components: Vec<String> = reader
            .keys()
            .filter_map(split_entry_key)
            .filter(|(stored, _)| stored == pair)
            .map(|(_, components)| components.to_string())
            .collect();
        if components.is_empty() {
            return Err(StoreError::DataNotFound(format!("{} in {}", pair, timespan)));
        }
        Ok(components)
    }

    /// Whether any component of `pair` is stored for `timespan`
    pub fn contains(&self, timespan: &Timespan, pair: &StationPair) -> bool {
        let prefix = format!("{}{}", pair.key(), COMPONENT_SEPARATOR);
        self.index
            .read()
            .get(timespan)
            .map_or(false, |reader| reader.keys().any(|k| k.starts_with(&prefix)))
    }

    pub fn read_correlation(
        &self,
        timespan: &Timespan,
        pair: &StationPair,
        components: &str,
    ) -> Result<CrossCorrelation> {
        let _enter = self.span.enter();
        let reader = self.reader_for(timespan)?;
        let payload = reader.get(&entry_key(pair, components))?;
        bincode::deserialize(&payload).map_err(|e| {
            StoreError::CorruptData(format!(
                "{} {} in {}: undecodable correlation: {}",
                pair, components, timespan, e
            ))
        })
    }

    /// Every component pair stored for `pair`, ordered by component name
    pub fn read_correlations(
        &self,
        timespan: &Timespan,
        pair: &StationPair,
    ) -> Result<Vec<CrossCorrelation>> {
        self.get_components(timespan, pair)?
            .iter()
            .map(|components| self.read_correlation(timespan, pair, components))
            .collect()
    }

    /// Store a correlation; same idempotence contract as raw appends
    pub fn append_correlation(
        &self,
        timespan: &Timespan,
        pair: &StationPair,
        correlation: &CrossCorrelation,
    ) -> Result<AppendOutcome> {
        let _enter = self.span.enter();
        if self.mode == StoreMode::ReadOnly {
            return Err(StoreError::ReadOnly(format!(
                "cannot write {} in {}",
                pair, timespan
            )));
        }
        if !valid_components(&correlation.components) {
            return Err(StoreError::CorruptData(format!(
                "{} in {}: invalid component pair '{}'",
                pair, timespan, correlation.components
            )));
        }
        if !correlation.sampling_rate.is_finite() || correlation.sampling_rate <= 0.0 {
            return Err(StoreError::CorruptData(format!(
                "{} in {}: invalid sampling rate {}",
                pair, timespan, correlation.sampling_rate
            )));
        }

        let key = entry_key(pair, &correlation.components);
        let payload = bincode::serialize(correlation)?;

        let _write_guard = self.write_lock.lock();
        let path = container_path(&self.dir, timespan);
        let _container_lock = WriteLock::acquire(&path)?;
        if temp_path(&path).exists() {
            return Err(StoreError::ConcurrentWrite(format!(
                "{} has an abandoned staging file",
                path.display()
            )));
        }

        let mut entries: BTreeMap<String, Vec<u8>> = if path.exists() {
            Self::open_container(&path)?.entries()?.into_iter().collect()
        } else {
            BTreeMap::new()
        };

        if let Some(stored) = entries.get(&key) {
            if *stored == payload {
                debug!(pair = %pair, timespan = %timespan, "Identical correlation already stored");
                return Ok(AppendOutcome::Unchanged);
            }
            return Err(StoreError::DuplicateWrite(format!(
                "{} {} in {}",
                pair, correlation.components, timespan
            )));
        }

        entries.insert(key, payload);
        write_container(&path, ContainerKind::Correlation, timespan, &entries)?;
        let reader = Self::open_container(&path)?;
        self.index.write().insert(*timespan, Arc::new(reader));

        debug!(
            pair = %pair,
            components = %correlation.components,
            timespan = %timespan,
            "Appended correlation"
        );
        Ok(AppendOutcome::Written)
    }

    fn open_container(path: &Path) -> Result<ContainerReader> {
        let reader = ContainerReader::open(path)?;
        if reader.kind() != ContainerKind::Correlation {
            return Err(StoreError::CorruptData(format!(
                "{} is not a correlation container",
                path.display()
            )));
        }
        Ok(reader)
    }

    fn reader_for(&self, timespan: &Timespan) -> Result<Arc<ContainerReader>> {
        self.index
            .read()
            .get(timespan)
            .filter(|reader| !reader.is_empty())
            .cloned()
            .ok_or_else(|| StoreError::DataNotFound(format!("timespan {}", timespan)))
    }
}

fn entry_key(pair: &StationPair, components: &str) -> String {
    format!("{}{}{}", pair.key(), COMPONENT_SEPARATOR, components)
}

fn split_entry_key(key: &str) -> Option<(StationPair, &str)> {
    let (pair, components) = key.split_once(COMPONENT_SEPARATOR)?;
    if !valid_components(components) {
        return None;
    }
    Some((StationPair::parse(pair)?, components))
}

/// Component pairs are short codes like `ZZ` or `EN`
fn valid_components(components: &str) -> bool {
    !components.is_empty() && components.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_pair_key_roundtrip() {
        let pair = StationPair::new(StationId::new("CI", "BAK"), StationId::new("CI", "CMB"));
        assert_eq!(pair.key(), "CI.BAK_CI.CMB");
        assert_eq!(StationPair::parse("CI.BAK_CI.CMB"), Some(pair));
        assert_eq!(StationPair::parse("CI.BAK"), None);
    }

    #[test]
    fn test_entry_key_roundtrip() {
        let pair = StationPair::new(StationId::new("CI", "BAK"), StationId::new("CI", "CMB"));
        let key = entry_key(&pair, "EN");
        assert_eq!(key, "CI.BAK_CI.CMB/EN");
        assert_eq!(split_entry_key(&key), Some((pair, "EN")));
        assert_eq!(split_entry_key("CI.BAK_CI.CMB"), None);
        assert_eq!(split_entry_key("CI.BAK_CI.CMB/"), None);
    }
}
