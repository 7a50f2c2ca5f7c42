//! Configuration for a noisestore pipeline run
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};
use crate::filter::{ChannelFilter, ALL_STATIONS};
use crate::params::{FreqNorm, StackMethod};
use crate::selector::SelectorOptions;
use crate::timespan::Timespan;

/// Main configuration for one pipeline run (one worker)
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // -------------------------------------------------------------------------
    // Archive Paths
    // -------------------------------------------------------------------------
    /// Raw waveform archive: container files, or an object layout with a
    /// station file
    pub raw_data_path: PathBuf,

    /// Cross-correlation archive
    /// Internal structure:
    ///   {ccf_path}/
    ///     ├── fft_cc_data.json
    ///     └── {fingerprint}/{timespan}.wfc
    pub ccf_path: PathBuf,

    /// Stacking output directory
    pub stack_path: PathBuf,

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------
    /// Station allow-list, `["*"]` for all
    pub stations: Vec<String>,

    /// Channel codes fetched by the download stage
    pub channels: Vec<String>,

    /// StationXML file or directory; takes precedence over `station.txt`
    pub xml_path: Option<PathBuf>,

    /// Restrict timespans to this range
    pub date_range: Option<Timespan>,

    // -------------------------------------------------------------------------
    // Processing
    // -------------------------------------------------------------------------
    pub freq_norm: FreqNorm,

    pub stack_method: StackMethod,

    /// Download chunk length (hours)
    pub inc_hours: u32,

    // -------------------------------------------------------------------------
    // Worker Partition
    // -------------------------------------------------------------------------
    /// Index of this worker, `0..worker_count`
    pub worker_index: usize,

    pub worker_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let root = PathBuf::from("./noisestore_data");
        Self {
            raw_data_path: root.join("RAW_DATA"),
            ccf_path: root.join("CCF"),
            stack_path: root.join("STACK"),
            stations: vec![ALL_STATIONS.to_string()],
            channels: vec!["BHE".to_string(), "BHN".to_string(), "BHZ".to_string()],
            xml_path: None,
            date_range: None,
            freq_norm: FreqNorm::Rma,
            stack_method: StackMethod::Linear,
            inc_hours: 24,
            worker_index: 0,
            worker_count: 1,
        }
    }
}

impl PipelineConfig {
    /// Create a new config builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Channel filter built from the station allow-list
    pub fn channel_filter(&self) -> ChannelFilter {
        ChannelFilter::new(&self.stations)
    }

    /// Options for the store selector
    pub fn selector_options(&self) -> SelectorOptions {
        SelectorOptions {
            filter: self.channel_filter(),
            xml_path: self.xml_path.clone(),
            date_range: self.date_range,
            ..SelectorOptions::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stations.is_empty() {
            return Err(StoreError::Configuration(
                "station list is empty; use '*' for all stations".to_string(),
            ));
        }
        if self.worker_count == 0 || self.worker_index >= self.worker_count {
            return Err(StoreError::Configuration(format!(
                "worker {} of {} is not a valid partition",
                self.worker_index, self.worker_count
            )));
        }
        if self.inc_hours == 0 {
            return Err(StoreError::Configuration(
                "inc_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for PipelineConfig
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the raw waveform archive directory
    pub fn raw_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.raw_data_path = path.into();
        self
    }

    /// Set the cross-correlation archive directory
    pub fn ccf_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ccf_path = path.into();
        self
    }

    /// Set the stacking output directory
    pub fn stack_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.stack_path = path.into();
        self
    }

    /// Set the station allow-list
    pub fn stations<S: Into<String>>(mut self, stations: impl IntoIterator<Item = S>) -> Self {
        self.config.stations = stations.into_iter().map(Into::into).collect();
        self
    }

    /// Set the channel codes to download
    pub fn channels<S: Into<String>>(mut self, channels: impl IntoIterator<Item = S>) -> Self {
        self.config.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the StationXML path
    pub fn xml_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.xml_path = Some(path.into());
        self
    }

    pub fn date_range(mut self, range: Option<Timespan>) -> Self {
        self.config.date_range = range;
        self
    }

    pub fn freq_norm(mut self, freq_norm: FreqNorm) -> Self {
        self.config.freq_norm = freq_norm;
        self
    }

    pub fn stack_method(mut self, method: StackMethod) -> Self {
        self.config.stack_method = method;
        self
    }

    /// Set the download chunk length (in hours)
    pub fn inc_hours(mut self, hours: u32) -> Self {
        self.config.inc_hours = hours;
        self
    }

    /// Set this worker's share of the timespans
    pub fn worker(mut self, index: usize, count: usize) -> Self {
        self.config.worker_index = index;
        self.config.worker_count = count;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
