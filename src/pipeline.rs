//! Pipeline wiring
//!
//! The processing stages are external collaborators behind traits; this
//! module connects them to the stores the way a run needs:
//!
//! ```text
//!  Download ──► raw archive (+ download_info.json)
//!                    │
//!                    ▼ selector
//!  CrossCorrelate ◄── raw store ──► CC store (read-write, fft_cc_data.json)
//!                                        │
//!                                        ▼
//!  Stack ◄────────────────────────── CC store (read-only)
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::{info, info_span};

use crate::cc::{CcStore, StoreMode};
use crate::config::PipelineConfig;
use crate::error::{Result, StoreError};
use crate::params::{read_metadata, write_metadata, ConfigParameters, DOWNLOAD_INFO, FFT_CC_INFO};
use crate::selector::select_raw_store;
use crate::store::RawDataStore;
use crate::timespan::Timespan;

/// Which stage(s) to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Download,
    CrossCorrelate,
    Stack,
    /// Download, then cross-correlate, then stack
    All,
}

impl FromStr for Step {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "download" => Ok(Step::Download),
            "cross_correlate" => Ok(Step::CrossCorrelate),
            "stack" => Ok(Step::Stack),
            "all" => Ok(Step::All),
            other => Err(StoreError::Configuration(format!(
                "unknown step '{}' (download, cross_correlate, stack, all)",
                other
            ))),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Download => "download",
            Step::CrossCorrelate => "cross_correlate",
            Step::Stack => "stack",
            Step::All => "all",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Stage Collaborators
// =============================================================================

/// Fetches waveforms into the raw archive
pub trait DownloadStage {
    fn download(
        &self,
        raw_dir: &Path,
        channels: &[String],
        stations: &[String],
        params: &ConfigParameters,
    ) -> Result<()>;
}

/// Correlates channel pairs for the given timespans
pub trait CrossCorrelationStage {
    fn cross_correlate(
        &self,
        raw_store: &dyn RawDataStore,
        timespans: &[Timespan],
        params: &ConfigParameters,
        cc_store: &CcStore,
    ) -> Result<()>;
}

/// Stacks stored correlations into `stack_dir`
pub trait StackingStage {
    fn stack(&self, cc_store: &CcStore, stack_dir: &Path, params: &ConfigParameters) -> Result<()>;
}

// =============================================================================
// Parameter Initialisation
// =============================================================================

/// Parameters recorded by the download stage, or defaults
pub fn initialize_fft_params(raw_dir: &Path) -> Result<ConfigParameters> {
    Ok(read_metadata(raw_dir, DOWNLOAD_INFO)?.unwrap_or_default())
}

/// Parameters recorded by the cross-correlation stage, or defaults
pub fn initialize_stack_params(ccf_dir: &Path) -> Result<ConfigParameters> {
    Ok(read_metadata(ccf_dir, FFT_CC_INFO)?.unwrap_or_default())
}

/// Round-robin share of `timespans` for worker `worker_index` of `worker_count`.
///
/// Shares of different workers are disjoint and together cover the input.
pub fn partition_timespans(
    timespans: Vec<Timespan>,
    worker_index: usize,
    worker_count: usize,
) -> Result<Vec<Timespan>> {
    if worker_count == 0 || worker_index >= worker_count {
        return Err(StoreError::Configuration(format!(
            "worker {} of {} is not a valid partition",
            worker_index, worker_count
        )));
    }
    Ok(timespans
        .into_iter()
        .enumerate()
        .filter(|(i, _)| i % worker_count == worker_index)
        .map(|(_, ts)| ts)
        .collect())
}

// =============================================================================
// Pipeline
// =============================================================================

/// One worker's run over the configured archives
pub struct Pipeline<'a> {
    config: PipelineConfig,
    download: &'a dyn DownloadStage,
    cross_correlation: &'a dyn CrossCorrelationStage,
    stacking: &'a dyn StackingStage,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        download: &'a dyn DownloadStage,
        cross_correlation: &'a dyn CrossCorrelationStage,
        stacking: &'a dyn StackingStage,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            download,
            cross_correlation,
            stacking,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, step: Step) -> Result<()> {
        let span = info_span!(
            "pipeline",
            step = %step,
            worker = self.config.worker_index,
            workers = self.config.worker_count
        );
        let _enter = span.enter();

        match step {
            Step::Download => self.run_download(),
            Step::CrossCorrelate => self.run_cross_correlation(),
            Step::Stack => self.run_stack(),
            Step::All => {
                self.run_download()?;
                self.run_cross_correlation()?;
                self.run_stack()
            }
        }
    }

    fn run_download(&self) -> Result<()> {
        let range = self.config.date_range.ok_or_else(|| {
            StoreError::Configuration("download needs a start and end date".to_string())
        })?;
        let mut params = ConfigParameters::default();
        params.start_date = Some(range.start());
        params.end_date = Some(range.end());
        params.inc_hours = self.config.inc_hours;
        params.validate()?;

        let raw_dir = &self.config.raw_data_path;
        info!(raw_dir = %raw_dir.display(), range = %range, "Running download");
        self.download
            .download(raw_dir, &self.config.channels, &self.config.stations, &params)?;
        write_metadata(raw_dir, DOWNLOAD_INFO, &params)?;
        Ok(())
    }

    fn run_cross_correlation(&self) -> Result<()> {
        let raw_dir = &self.config.raw_data_path;
        let mut params = initialize_fft_params(raw_dir)?;
        params.freq_norm = self.config.freq_norm;
        params.validate()?;

        let cc_store = CcStore::open(&self.config.ccf_path, StoreMode::ReadWrite, &params)?;
        let (backend, raw_store) = select_raw_store(raw_dir, &self.config.selector_options())?;
        let timespans = partition_timespans(
            raw_store.get_timespans()?,
            self.config.worker_index,
            self.config.worker_count,
        )?;

        info!(
            backend = %backend,
            timespans = timespans.len(),
            fingerprint = cc_store.fingerprint(),
            "Running cross-correlation"
        );
        self.cross_correlation
            .cross_correlate(raw_store.as_ref(), &timespans, &params, &cc_store)
    }

    fn run_stack(&self) -> Result<()> {
        let mut params = initialize_stack_params(&self.config.ccf_path)?;
        params.stack_method = self.config.stack_method;

        let cc_store = CcStore::open(&self.config.ccf_path, StoreMode::ReadOnly, &params)?;
        info!(
            fingerprint = cc_store.fingerprint(),
            stack_dir = %self.config.stack_path.display(),
            "Running stacking"
        );
        self.stacking.stack(&cc_store, &self.config.stack_path, &params)
    }
}
