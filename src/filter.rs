//! Channel filter predicate
//!
//! Built from a station allow-list: either the single wildcard `"*"` or an
//! explicit set of station names. The predicate holds no mutable state and is
//! `Send + Sync`, so workers can share or clone it freely.

use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::Channel;

/// Wildcard entry meaning "every station"
pub const ALL_STATIONS: &str = "*";

/// Pure `Channel -> bool` predicate over station names
#[derive(Debug, Clone)]
pub enum ChannelFilter {
    /// Accepts every channel
    All,
    /// Accepts channels whose station name is in the set
    Stations(Arc<HashSet<String>>),
}

impl ChannelFilter {
    /// Build from an allow-list. `["*"]` short-circuits to [`ChannelFilter::All`]
    /// without building a set.
    pub fn new<S: AsRef<str>>(stations: &[S]) -> Self {
        if stations.len() == 1 && stations[0].as_ref() == ALL_STATIONS {
            return ChannelFilter::All;
        }
        ChannelFilter::Stations(Arc::new(
            stations.iter().map(|s| s.as_ref().to_string()).collect(),
        ))
    }

    /// Parse a comma separated list (`"*"` or `"BAK,CMB"`)
    pub fn parse(list: &str) -> Self {
        let stations: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        Self::new(&stations)
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        self.matches_station(&channel.station.name)
    }

    pub fn matches_station(&self, station: &str) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::Stations(set) => set.contains(station),
        }
    }

    /// Closure form for callers that want a plain predicate
    pub fn into_predicate(self) -> impl Fn(&Channel) -> bool + Send + Sync + Clone {
        move |ch: &Channel| self.matches(ch)
    }
}

impl Default for ChannelFilter {
    fn default() -> Self {
        ChannelFilter::All
    }
}
