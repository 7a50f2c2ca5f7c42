//! Station-inventory channel catalog
//!
//! Parses one StationXML document or a directory of them. A channel may have
//! several epochs (instrument swaps, relocations); a lookup picks the single
//! epoch whose validity interval contains the requested time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::timespan::parse_datetime;

use super::{
    Channel, ChannelCatalog, ChannelId, ChannelType, InstrumentResponse, Orientation, Station,
};

/// One validity interval of a channel's metadata. `None` bounds are open.
#[derive(Debug, Clone)]
struct ChannelEpoch {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    channel: Channel,
}

impl ChannelEpoch {
    fn covers(&self, at: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| s <= *at) && self.end.map_or(true, |e| *at < e)
    }
}

/// Catalog backed by StationXML inventory documents
pub struct XmlStationChannelCatalog {
    path: PathBuf,
    epochs: BTreeMap<ChannelId, Vec<ChannelEpoch>>,
}

impl XmlStationChannelCatalog {
    /// Load every `*.xml` document under `path` (or `path` itself if a file)
    pub fn open(path: &Path) -> Result<Self> {
        let fs = LocalFileSystem::new();
        let name = path.to_string_lossy();
        if path.is_file() {
            return Self::load(&fs, &name, vec![name.to_string()]);
        }
        if !path.is_dir() {
            return Err(StoreError::Configuration(format!(
                "station inventory {} does not exist",
                path.display()
            )));
        }
        Self::open_with(&fs, &name)
    }

    /// Load through a [`FileSystem`]. A path ending in `.xml` is one
    /// document; anything else is listed as a directory of documents.
    pub fn open_with(fs: &dyn FileSystem, path: &str) -> Result<Self> {
        let files = if is_xml_name(path) {
            vec![path.to_string()]
        } else {
            fs.list_dir(path)?
                .into_iter()
                .filter(|name| is_xml_name(name))
                .map(|name| fs.join(path, &name))
                .collect()
        };
        Self::load(fs, path, files)
    }

    fn load(fs: &dyn FileSystem, path: &str, files: Vec<String>) -> Result<Self> {
        if files.is_empty() {
            return Err(StoreError::Configuration(format!(
                "no StationXML documents found in {}",
                path
            )));
        }

        let mut catalog = Self {
            path: PathBuf::from(path),
            epochs: BTreeMap::new(),
        };
        for file in &files {
            let bytes = fs.read(file).map_err(|e| match e {
                StoreError::DataNotFound(_) => StoreError::Configuration(format!(
                    "station inventory {} does not exist",
                    file
                )),
                other => other,
            })?;
            let xml = std::str::from_utf8(&bytes).map_err(|e| {
                StoreError::Configuration(format!("{}: not UTF-8: {}", file, e))
            })?;
            catalog.add_document(xml).map_err(|e| match e {
                StoreError::Configuration(msg) => {
                    StoreError::Configuration(format!("{}: {}", file, msg))
                }
                other => other,
            })?;
        }
        debug!(
            path = %path,
            documents = files.len(),
            channels = catalog.epochs.len(),
            "Loaded station inventory"
        );
        Ok(catalog)
    }

    /// Build a catalog from in-memory documents
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut catalog = Self {
            path: PathBuf::new(),
            epochs: BTreeMap::new(),
        };
        for xml in documents {
            catalog.add_document(xml)?;
        }
        Ok(catalog)
    }

    fn add_document(&mut self, xml: &str) -> Result<()> {
        let doc = Document::parse(xml)
            .map_err(|e| StoreError::Configuration(format!("invalid StationXML: {}", e)))?;

        for network in doc.descendants().filter(|n| is_tag(*n, "Network")) {
            let net_code = required_attr(network, "code")?;
            for station in network.children().filter(|n| is_tag(*n, "Station")) {
                let sta_code = required_attr(station, "code")?;
                let sta_lat = parse_opt_f64(station, "Latitude")?;
                let sta_lon = parse_opt_f64(station, "Longitude")?;
                let sta_elev = parse_opt_f64(station, "Elevation")?;

                for chan in station.children().filter(|n| is_tag(*n, "Channel")) {
                    let code = required_attr(chan, "code")?;
                    let location = chan.attribute("locationCode").unwrap_or("").trim();
                    let location = if location == "--" { "" } else { location };

                    let latitude = parse_opt_f64(chan, "Latitude")?.or(sta_lat);
                    let longitude = parse_opt_f64(chan, "Longitude")?.or(sta_lon);
                    let elevation = parse_opt_f64(chan, "Elevation")?.or(sta_elev);
                    let (latitude, longitude, elevation) = match (latitude, longitude, elevation)
                    {
                        (Some(lat), Some(lon), Some(elev)) => (lat, lon, elev),
                        _ => {
                            return Err(StoreError::Configuration(format!(
                                "channel {}.{}.{}.{} has no coordinates",
                                net_code, sta_code, location, code
                            )))
                        }
                    };

                    let orientation = match (
                        parse_opt_f64(chan, "Azimuth")?,
                        parse_opt_f64(chan, "Dip")?,
                    ) {
                        (Some(azimuth), Some(dip)) => Some(Orientation { azimuth, dip }),
                        _ => None,
                    };

                    let channel = Channel {
                        station: Station {
                            network: net_code.to_string(),
                            name: sta_code.to_string(),
                            location: location.to_string(),
                            latitude,
                            longitude,
                            elevation,
                        },
                        channel_type: ChannelType::new(code, location),
                        orientation,
                        response: parse_response(chan)?,
                    };

                    let epoch = ChannelEpoch {
                        start: parse_opt_date(chan, "startDate")?,
                        end: parse_opt_date(chan, "endDate")?,
                        channel,
                    };
                    self.epochs
                        .entry(epoch.channel.id())
                        .or_default()
                        .push(epoch);
                }
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of epochs recorded for a channel
    pub fn epoch_count(&self, id: &ChannelId) -> usize {
        self.epochs.get(id).map_or(0, Vec::len)
    }
}

impl ChannelCatalog for XmlStationChannelCatalog {
    fn get_channel_metadata(&self, id: &ChannelId, at: DateTime<Utc>) -> Result<Channel> {
        let unknown = || StoreError::UnknownChannel {
            channel: id.to_string(),
            at: at.to_rfc3339(),
        };
        let epochs = self.epochs.get(id).ok_or_else(unknown)?;
        let covering: Vec<&ChannelEpoch> = epochs.iter().filter(|e| e.covers(&at)).collect();
        match covering.as_slice() {
            [] => Err(unknown()),
            [epoch] => Ok(epoch.channel.clone()),
            many => {
                warn!(channel = %id, at = %at, epochs = many.len(), "Overlapping channel epochs");
                Err(StoreError::AmbiguousChannelMetadata {
                    channel: id.to_string(),
                    at: at.to_rfc3339(),
                    epochs: many.len(),
                })
            }
        }
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self
            .epochs
            .values()
            .filter_map(|epochs| epochs.iter().max_by_key(|e| e.start))
            .map(|e| e.channel.clone())
            .collect())
    }
}

// =============================================================================
// XML Helpers
// =============================================================================

fn is_tag(node: Node<'_, '_>, tag: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(tag)
}

fn child<'a>(node: Node<'a, 'a>, tag: &str) -> Option<Node<'a, 'a>> {
    node.children().find(|n| is_tag(*n, tag))
}

fn child_text<'a>(node: Node<'a, 'a>, tag: &str) -> Option<&'a str> {
    child(node, tag).and_then(|n| n.text()).map(str::trim)
}

fn required_attr<'a>(node: Node<'a, 'a>, name: &str) -> Result<&'a str> {
    node.attribute(name).map(str::trim).ok_or_else(|| {
        StoreError::Configuration(format!(
            "<{}> is missing the '{}' attribute",
            node.tag_name().name(),
            name
        ))
    })
}

fn parse_opt_f64(node: Node<'_, '_>, tag: &str) -> Result<Option<f64>> {
    match child_text(node, tag) {
        Some(v) if !v.is_empty() => v.parse::<f64>().map(Some).map_err(|e| {
            StoreError::Configuration(format!("<{}> value '{}': {}", tag, v, e))
        }),
        _ => Ok(None),
    }
}

fn parse_opt_date(node: Node<'_, '_>, attr: &str) -> Result<Option<DateTime<Utc>>> {
    match node.attribute(attr).map(str::trim) {
        Some(v) if !v.is_empty() => parse_datetime(v).map(Some),
        _ => Ok(None),
    }
}

fn parse_response(chan: Node<'_, '_>) -> Result<Option<InstrumentResponse>> {
    let sensitivity = match child(chan, "Response").and_then(|r| child(r, "InstrumentSensitivity"))
    {
        Some(node) => node,
        None => return Ok(None),
    };
    let value = match parse_opt_f64(sensitivity, "Value")? {
        Some(v) => v,
        None => return Ok(None),
    };
    let units = |tag: &str| {
        child(sensitivity, tag)
            .and_then(|u| child_text(u, "Name"))
            .unwrap_or("")
            .to_string()
    };
    Ok(Some(InstrumentResponse {
        sensitivity: value,
        frequency: parse_opt_f64(sensitivity, "Frequency")?.unwrap_or(0.0),
        input_units: units("InputUnits"),
        output_units: units("OutputUnits"),
    }))
}

fn is_xml_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map_or(false, |(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case("xml"))
}
