//! Channel value types
//!
//! `Channel` identity is `(network, station, channel code, location)`; the
//! remaining fields are metadata resolved from a catalog.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A recording station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub network: String,
    pub name: String,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level
    pub elevation: f64,
}

impl Station {
    /// `NET.STA`
    pub fn code(&self) -> String {
        format!("{}.{}", self.network, self.name)
    }
}

/// Band/orientation code plus location code, e.g. `BHN` at `00`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelType {
    pub name: String,
    pub location: String,
}

impl ChannelType {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    /// Last letter of the channel code (`Z`, `N`, `E`, ...)
    pub fn component(&self) -> Option<char> {
        self.name.chars().last().map(|c| c.to_ascii_uppercase())
    }
}

/// Displays as `bhn_00`
impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name.to_lowercase(), self.location)
    }
}

impl FromStr for ChannelType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('_') {
            Some((name, location)) if !name.is_empty() => Ok(ChannelType::new(
                name.to_uppercase(),
                location.to_string(),
            )),
            _ if !s.is_empty() && !s.contains('_') => Ok(ChannelType::new(s.to_uppercase(), "")),
            _ => Err(StoreError::Configuration(format!(
                "'{}' is not a channel type (expected e.g. bhn_00)",
                s
            ))),
        }
    }
}

/// Identity of a channel, used as index and container key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl ChannelId {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
        }
    }

    /// Inverse of `Display`
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split('.');
        let id = Self::new(parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || id.network.is_empty() || id.station.is_empty() {
            return None;
        }
        Some(id)
    }
}

/// `NET.STA.LOC.CHAN`
impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

/// Sensor orientation in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub azimuth: f64,
    pub dip: f64,
}

/// Overall instrument sensitivity. Full response stages are not modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentResponse {
    pub sensitivity: f64,
    pub frequency: f64,
    pub input_units: String,
    pub output_units: String,
}

/// A single sensor component at a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub station: Station,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub orientation: Option<Orientation>,
    pub response: Option<InstrumentResponse>,
}

impl Channel {
    /// Channel with location-only metadata
    pub fn new(station: Station, channel_type: ChannelType) -> Self {
        Self {
            station,
            channel_type,
            orientation: None,
            response: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        ChannelId::new(
            &self.station.network,
            &self.station.name,
            &self.channel_type.location,
            &self.channel_type.name,
        )
    }

    /// Identity comparison, ignoring metadata
    pub fn same_identity(&self, other: &Channel) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.station.name, self.channel_type)
    }
}
