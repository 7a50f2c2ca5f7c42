//! Channel Catalog Module
//!
//! Resolves a channel identity and a timestamp to physical metadata:
//! station location, orientation and instrument response.
//!
//! ## Backends
//! - [`CsvChannelCatalog`]: one delimited `station.txt` table, valid for all times
//! - [`XmlStationChannelCatalog`]: StationXML documents with time-bounded epochs
//!
//! Raw data stores reference channels by [`ChannelId`] and never own catalog state.

mod channel;
mod inventory;
mod tabular;

use chrono::{DateTime, Utc};

use crate::error::Result;

pub use self::channel::{Channel, ChannelId, ChannelType, InstrumentResponse, Orientation, Station};
pub use self::inventory::XmlStationChannelCatalog;
pub use self::tabular::CsvChannelCatalog;

/// Name of the tabular catalog file inside a raw-data directory
pub const STATION_FILE: &str = "station.txt";

/// Metadata resolver shared by both catalog backends
pub trait ChannelCatalog: Send + Sync {
    /// Metadata of `id` valid at `at`
    ///
    /// Fails with `UnknownChannel` when no metadata covers `at`, and with
    /// `AmbiguousChannelMetadata` when more than one epoch does.
    fn get_channel_metadata(&self, id: &ChannelId, at: DateTime<Utc>) -> Result<Channel>;

    /// Every channel the catalog knows, one entry per identity
    fn list_channels(&self) -> Result<Vec<Channel>>;
}
