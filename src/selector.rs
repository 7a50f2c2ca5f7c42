//! Store Selector
//!
//! Picks the raw data backend from the contents of the raw-data directory.
//!
//! | container files (`*.wfc`) | inventory path given | `station.txt` present | backend |
//! |---|---|---|---|
//! | yes | any | any | local containers |
//! | no | yes | any | object store, inventory catalog |
//! | no | no | yes | object store, tabular catalog |
//! | no | no | no | `ConfigurationError` |
//!
//! Containers win over catalog files unconditionally.
//!
//! Container archives are local only and are looked for on disk. Catalog
//! files and day objects are read through `SelectorOptions::fs`, so an
//! object archive may live behind any [`FileSystem`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::catalog::{ChannelCatalog, CsvChannelCatalog, XmlStationChannelCatalog, STATION_FILE};
use crate::container::list_containers;
use crate::error::{Result, StoreError};
use crate::filter::ChannelFilter;
use crate::fs::{FileSystem, LocalFileSystem};
use crate::store::{ContainerRawDataStore, ObjectRawDataStore, RawDataStore};
use crate::timespan::Timespan;

/// Backend chosen by [`decide_backend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Local container files in the raw-data directory
    Container,
    /// Object layout with channels from a StationXML file or directory
    ObjectWithInventory(PathBuf),
    /// Object layout with channels from the tabular station file
    ObjectWithTable(PathBuf),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Container => "container",
            Backend::ObjectWithInventory(_) => "object (inventory catalog)",
            Backend::ObjectWithTable(_) => "object (tabular catalog)",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs besides the directory itself
#[derive(Clone)]
pub struct SelectorOptions {
    pub filter: ChannelFilter,
    pub xml_path: Option<PathBuf>,
    pub date_range: Option<Timespan>,
    pub fs: Arc<dyn FileSystem>,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            filter: ChannelFilter::All,
            xml_path: None,
            date_range: None,
            fs: Arc::new(LocalFileSystem::new()),
        }
    }
}

impl fmt::Debug for SelectorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorOptions")
            .field("filter", &self.filter)
            .field("xml_path", &self.xml_path)
            .field("date_range", &self.date_range)
            .finish()
    }
}

/// Apply the decision table without constructing anything
pub fn decide_backend(raw_dir: &Path, options: &SelectorOptions) -> Result<Backend> {
    if !list_containers(raw_dir)?.is_empty() {
        return Ok(Backend::Container);
    }

    if let Some(xml_path) = &options.xml_path {
        return Ok(Backend::ObjectWithInventory(xml_path.clone()));
    }

    let dir = raw_dir.to_string_lossy();
    let station_file = options.fs.join(&dir, STATION_FILE);
    if options.fs.exists(&station_file) {
        return Ok(Backend::ObjectWithTable(PathBuf::from(station_file)));
    }

    Err(StoreError::Configuration(format!(
        "no container files in {} and no catalog: pass an inventory path or provide {}",
        raw_dir.display(),
        STATION_FILE
    )))
}

/// Construct the raw data store for `raw_dir`
pub fn select_raw_store(
    raw_dir: &Path,
    options: &SelectorOptions,
) -> Result<(Backend, Box<dyn RawDataStore>)> {
    let backend = decide_backend(raw_dir, options)?;
    info!(raw_dir = %raw_dir.display(), backend = %backend, "Selected raw data store");

    let store: Box<dyn RawDataStore> = match &backend {
        Backend::Container => Box::new(ContainerRawDataStore::open(raw_dir)?),
        Backend::ObjectWithInventory(path) => {
            let catalog = Arc::new(XmlStationChannelCatalog::open_with(
                options.fs.as_ref(),
                &path.to_string_lossy(),
            )?);
            Box::new(open_object_store(raw_dir, options, catalog)?)
        }
        Backend::ObjectWithTable(path) => {
            let catalog = Arc::new(CsvChannelCatalog::open_with(
                options.fs.as_ref(),
                &path.to_string_lossy(),
            )?);
            Box::new(open_object_store(raw_dir, options, catalog)?)
        }
    };
    Ok((backend, store))
}

fn open_object_store(
    raw_dir: &Path,
    options: &SelectorOptions,
    catalog: Arc<dyn ChannelCatalog>,
) -> Result<ObjectRawDataStore> {
    ObjectRawDataStore::open(
        &raw_dir.to_string_lossy(),
        Arc::clone(&options.fs),
        catalog,
        options.filter.clone(),
        options.date_range,
    )
}
