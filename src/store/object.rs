//! Object-store backend
//!
//! Continuous waveforms laid out one object per channel per day:
//!
//! ```text
//! {root}/{NET}/{STA}/{YYYY}/{DDD}/{STA}.{NET}.{CHAN}.{LOC}.{YYYY}.{DDD}
//! ```
//!
//! The objects carry no instrument metadata, so channels come from a
//! [`ChannelCatalog`]. Timespans are whole UTC days for which at least one
//! catalog channel accepted by the filter has an object, optionally
//! restricted to a date range. Read-only.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, info_span, warn, Span};

use crate::catalog::{Channel, ChannelCatalog, ChannelId};
use crate::error::{Result, StoreError};
use crate::filter::ChannelFilter;
use crate::fs::FileSystem;
use crate::timespan::Timespan;

use super::{validate_sample_count, ChannelData, NativeTraceDecoder, RawDataStore, WaveformDecoder};

/// Key of one channel-day object
pub fn object_key(fs: &dyn FileSystem, root: &str, id: &ChannelId, date: NaiveDate) -> String {
    let dir = day_dir(fs, root, &id.network, &id.station, date);
    fs.join(&dir, &object_name(id, date))
}

fn object_name(id: &ChannelId, date: NaiveDate) -> String {
    format!(
        "{}.{}.{}.{}.{:04}.{:03}",
        id.station,
        id.network,
        id.channel,
        id.location,
        date.year(),
        date.ordinal()
    )
}

fn day_dir(fs: &dyn FileSystem, root: &str, network: &str, station: &str, date: NaiveDate) -> String {
    let station_dir = fs.join(&fs.join(root, network), station);
    let year_dir = fs.join(&station_dir, &format!("{:04}", date.year()));
    fs.join(&year_dir, &format!("{:03}", date.ordinal()))
}

/// Read-only store over a network/station/day object layout
pub struct ObjectRawDataStore {
    root: String,
    fs: Arc<dyn FileSystem>,
    catalog: Arc<dyn ChannelCatalog>,
    filter: ChannelFilter,
    date_range: Option<Timespan>,
    decoder: Arc<dyn WaveformDecoder>,
    /// Day → channels with an object that day; immutable after construction
    index: BTreeMap<Timespan, BTreeSet<ChannelId>>,
    span: Span,
}

impl ObjectRawDataStore {
    /// Build the day index by listing the layout for every catalog channel
    /// accepted by `filter`
    pub fn open(
        root: &str,
        fs: Arc<dyn FileSystem>,
        catalog: Arc<dyn ChannelCatalog>,
        filter: ChannelFilter,
        date_range: Option<Timespan>,
    ) -> Result<Self> {
        Self::with_decoder(
            root,
            fs,
            catalog,
            filter,
            date_range,
            Arc::new(NativeTraceDecoder),
        )
    }

    /// Same as [`ObjectRawDataStore::open`] with a custom object decoder
    pub fn with_decoder(
        root: &str,
        fs: Arc<dyn FileSystem>,
        catalog: Arc<dyn ChannelCatalog>,
        filter: ChannelFilter,
        date_range: Option<Timespan>,
        decoder: Arc<dyn WaveformDecoder>,
    ) -> Result<Self> {
        let span = info_span!("raw_store", backend = "object", root = %root);
        let index = {
            let _enter = span.enter();
            Self::build_index(root, fs.as_ref(), catalog.as_ref(), &filter, date_range.as_ref())?
        };

        Ok(Self {
            root: root.to_string(),
            fs,
            catalog,
            filter,
            date_range,
            decoder,
            index,
            span,
        })
    }

    /// Replace the default observability span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn date_range(&self) -> Option<&Timespan> {
        self.date_range.as_ref()
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    fn build_index(
        root: &str,
        fs: &dyn FileSystem,
        catalog: &dyn ChannelCatalog,
        filter: &ChannelFilter,
        date_range: Option<&Timespan>,
    ) -> Result<BTreeMap<Timespan, BTreeSet<ChannelId>>> {
        // (network, station) → catalog channels accepted by the filter
        let mut stations: BTreeMap<(String, String), Vec<ChannelId>> = BTreeMap::new();
        for channel in catalog.list_channels()? {
            if filter.matches(&channel) {
                stations
                    .entry((channel.station.network.clone(), channel.station.name.clone()))
                    .or_default()
                    .push(channel.id());
            }
        }

        let mut index: BTreeMap<Timespan, BTreeSet<ChannelId>> = BTreeMap::new();
        for ((network, station), ids) in &stations {
            let station_dir = fs.join(&fs.join(root, network), station);
            for year_name in fs.list_dir(&station_dir)? {
                let year: i32 = match year_name.parse() {
                    Ok(y) => y,
                    Err(_) => continue,
                };
                let year_dir = fs.join(&station_dir, &year_name);
                for day_name in fs.list_dir(&year_dir)? {
                    let date = match day_name
                        .parse::<u32>()
                        .ok()
                        .and_then(|doy| NaiveDate::from_yo_opt(year, doy))
                    {
                        Some(date) => date,
                        None => continue,
                    };
                    let day = Timespan::day(date);
                    if let Some(range) = date_range {
                        if !range.contains(&day.start()) {
                            continue;
                        }
                    }

                    let objects: BTreeSet<String> =
                        fs.list_dir(&fs.join(&year_dir, &day_name))?.into_iter().collect();
                    for id in ids {
                        if objects.contains(&object_name(id, date)) {
                            index.entry(day).or_default().insert(id.clone());
                        }
                    }
                }
            }
        }

        info!(
            stations = stations.len(),
            days = index.len(),
            "Indexed object store"
        );
        Ok(index)
    }
}

impl RawDataStore for ObjectRawDataStore {
    fn get_timespans(&self) -> Result<Vec<Timespan>> {
        Ok(self.index.keys().copied().collect())
    }

    fn get_channels(&self, timespan: &Timespan) -> Result<Vec<Channel>> {
        let _enter = self.span.enter();
        let ids = self
            .index
            .get(timespan)
            .ok_or_else(|| StoreError::DataNotFound(format!("timespan {}", timespan)))?;

        let mut channels = Vec::with_capacity(ids.len());
        for id in ids {
            match self.catalog.get_channel_metadata(id, timespan.start()) {
                Ok(channel) => channels.push(channel),
                Err(e @ StoreError::UnknownChannel { .. })
                | Err(e @ StoreError::AmbiguousChannelMetadata { .. }) => {
                    warn!(channel = %id, timespan = %timespan, error = %e, "Skipping channel");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(channels)
    }

    fn read_data(&self, timespan: &Timespan, channel: &Channel) -> Result<ChannelData> {
        let _enter = self.span.enter();
        let id = channel.id();
        let indexed = self
            .index
            .get(timespan)
            .map_or(false, |ids| ids.contains(&id));
        if !indexed {
            return Err(StoreError::DataNotFound(format!("{} in {}", id, timespan)));
        }

        let key = object_key(self.fs.as_ref(), &self.root, &id, timespan.start().date_naive());
        let bytes = self.fs.read(&key)?;
        let data = self.decoder.decode(&bytes).map_err(|e| match e {
            StoreError::CorruptData(msg) => StoreError::CorruptData(format!("{}: {}", key, msg)),
            other => other,
        })?;
        validate_sample_count(timespan, &data, &key)?;
        debug!(object = %key, samples = data.data.len(), "Read object");
        Ok(data)
    }

    fn backend(&self) -> &'static str {
        "object"
    }
}
