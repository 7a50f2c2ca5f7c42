//! Raw Data Store Module
//!
//! Uniform, time-indexed and channel-indexed access to waveform archives.
//!
//! ## Contract
//! - `get_timespans()` lists every timespan with at least one channel,
//!   chronologically, stable for the lifetime of the instance
//! - `get_channels(ts)` requires a timespan returned by `get_timespans()` on
//!   the same instance; anything else is `DataNotFound`
//! - `read_data(ts, ch)` returns decoded samples or a distinct error kind
//! - `append_data` lives on the separate [`RawDataWriter`] capability, only
//!   offered by write-capable backends
//!
//! ## Backends
//! - [`ContainerRawDataStore`]: local container files, read-write
//! - [`ObjectRawDataStore`]: network/station/day object layout, read-only

mod local;
mod object;
mod trace;

use serde::{Deserialize, Serialize};

use crate::catalog::Channel;
use crate::error::{Result, StoreError};
use crate::timespan::Timespan;

pub use local::ContainerRawDataStore;
pub use object::{object_key, ObjectRawDataStore};
pub use trace::{encode_trace, NativeTraceDecoder, WaveformDecoder};

/// Extra samples tolerated beyond `round(duration * sampling_rate)`; one
/// inclusive end sample is normal (1 h at 20 Hz stores 72001)
pub const SAMPLE_TOLERANCE: usize = 1;

/// One channel's waveform for one timespan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    pub data: Vec<f32>,
    /// Samples per second
    pub sampling_rate: f64,
    /// Epoch seconds of the first sample
    pub start_timestamp: f64,
}

impl ChannelData {
    pub fn new(data: Vec<f32>, sampling_rate: f64, start_timestamp: f64) -> Self {
        Self {
            data,
            sampling_rate,
            start_timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Seconds covered by the samples
    pub fn duration_seconds(&self) -> f64 {
        self.data.len() as f64 / self.sampling_rate
    }
}

/// Result of an `append_data` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The entry was committed
    Written,
    /// Identical data was already stored; nothing changed
    Unchanged,
}

/// Read side of a waveform archive
pub trait RawDataStore: Send + Sync {
    /// Timespans with at least one channel, in chronological order
    fn get_timespans(&self) -> Result<Vec<Timespan>>;

    /// Channels available in exactly `timespan`
    ///
    /// Precondition: `timespan` came from `get_timespans()` on this instance.
    fn get_channels(&self, timespan: &Timespan) -> Result<Vec<Channel>>;

    /// Samples of `channel` within `timespan`
    fn read_data(&self, timespan: &Timespan, channel: &Channel) -> Result<ChannelData>;

    /// Write capability, if this backend has one
    fn writer(&self) -> Option<&dyn RawDataWriter> {
        None
    }

    /// Check whole-archive checksums where the backend keeps them
    fn verify_integrity(&self) -> Result<()> {
        Ok(())
    }

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

/// Write side of a waveform archive
pub trait RawDataWriter: Send + Sync {
    /// Store `data` for `(timespan, channel)`.
    ///
    /// Re-appending identical data is a no-op; different data for an already
    /// written pair fails with `DuplicateWrite` and leaves the archive as it was.
    fn append_data(
        &self,
        timespan: &Timespan,
        channel: &Channel,
        data: &ChannelData,
    ) -> Result<AppendOutcome>;
}

/// Reject payloads whose sample count cannot belong to `timespan`.
///
/// Shorter payloads are gaps and pass; only an impossible rate or an excess
/// beyond [`SAMPLE_TOLERANCE`] is corrupt.
pub fn validate_sample_count(timespan: &Timespan, data: &ChannelData, what: &str) -> Result<()> {
    if !data.sampling_rate.is_finite() || data.sampling_rate <= 0.0 {
        return Err(StoreError::CorruptData(format!(
            "{}: invalid sampling rate {}",
            what, data.sampling_rate
        )));
    }
    let expected = (timespan.duration_seconds() * data.sampling_rate).round() as usize;
    if data.data.len() > expected + SAMPLE_TOLERANCE {
        return Err(StoreError::CorruptData(format!(
            "{}: {} samples at {} Hz do not fit {} ({} expected)",
            what,
            data.data.len(),
            data.sampling_rate,
            timespan,
            expected
        )));
    }
    Ok(())
}
