//! Processing parameters and archive metadata
//!
//! [`ConfigParameters`] is the stage-to-stage contract: the download stage
//! records what it fetched next to the raw archive, the cross-correlation
//! stage records its settings next to the correlation archive, and later
//! stages pre-populate their parameters from those records.
//!
//! ## On-disk format
//! `{stem}.json`, a JSON object with a `format_version` field plus the
//! parameter fields. Older archives carry `{stem}.txt` in a single-quoted
//! dict form; that is read through [`legacy`] and never written.

mod legacy;

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::timespan::Timespan;

pub use legacy::decode_legacy_metadata;

/// Version written by [`encode_metadata`]
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// Stem of the record the download stage writes into the raw-data directory
pub const DOWNLOAD_INFO: &str = "download_info";

/// Stem of the record the cross-correlation stage writes into the CC directory
pub const FFT_CC_INFO: &str = "fft_cc_data";

// =============================================================================
// Enumerations
// =============================================================================

/// Spectral normalization applied before correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreqNorm {
    /// Running-mean average
    Rma,
    No,
    PhaseOnly,
}

impl FromStr for FreqNorm {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rma" => Ok(FreqNorm::Rma),
            "no" => Ok(FreqNorm::No),
            "phase_only" => Ok(FreqNorm::PhaseOnly),
            other => Err(StoreError::Configuration(format!(
                "unknown frequency normalization '{}' (rma, no, phase_only)",
                other
            ))),
        }
    }
}

impl fmt::Display for FreqNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FreqNorm::Rma => "rma",
            FreqNorm::No => "no",
            FreqNorm::PhaseOnly => "phase_only",
        };
        f.write_str(s)
    }
}

/// Stacking statistic used by the stacking stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackMethod {
    Linear,
    Pws,
    Robust,
    Nroot,
    Selective,
    AutoCovariance,
    All,
}

impl FromStr for StackMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(StackMethod::Linear),
            "pws" => Ok(StackMethod::Pws),
            "robust" => Ok(StackMethod::Robust),
            "nroot" => Ok(StackMethod::Nroot),
            "selective" => Ok(StackMethod::Selective),
            "auto_covariance" => Ok(StackMethod::AutoCovariance),
            "all" => Ok(StackMethod::All),
            other => Err(StoreError::Configuration(format!(
                "unknown stacking method '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// ConfigParameters
// =============================================================================

/// Flat record of processing parameters, passed by value between stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigParameters {
    /// Target sampling frequency (Hz)
    pub samp_freq: f64,
    /// Correlation window length (s)
    pub cc_len: f64,
    /// Window step (s)
    pub step: f64,
    /// Lower corner of the frequency band (Hz)
    pub freqmin: f64,
    /// Upper corner of the frequency band (Hz)
    pub freqmax: f64,
    pub freq_norm: FreqNorm,
    /// Maximum lag kept in correlation functions (s)
    pub maxlag: f64,
    /// Download chunk length (hours)
    pub inc_hours: u32,
    /// Components per station
    pub ncomp: u32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub stack_method: StackMethod,
}

impl Default for ConfigParameters {
    fn default() -> Self {
        Self {
            samp_freq: 20.0,
            cc_len: 1800.0,
            step: 450.0,
            freqmin: 0.05,
            freqmax: 2.0,
            freq_norm: FreqNorm::Rma,
            maxlag: 200.0,
            inc_hours: 24,
            ncomp: 3,
            start_date: None,
            end_date: None,
            stack_method: StackMethod::Linear,
        }
    }
}

/// The subset of parameters that changes correlation output
#[derive(Serialize)]
struct FingerprintFields {
    samp_freq: f64,
    cc_len: f64,
    step: f64,
    freqmin: f64,
    freqmax: f64,
    freq_norm: FreqNorm,
    maxlag: f64,
    ncomp: u32,
}

impl ConfigParameters {
    /// Date range recorded in the parameters, if both ends are set
    pub fn date_range(&self) -> Result<Option<Timespan>> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => Timespan::new(start, end).map(Some).map_err(|e| {
                StoreError::Configuration(format!("invalid recorded date range: {}", e))
            }),
            _ => Ok(None),
        }
    }

    /// 8 hex digits identifying the correlation-relevant settings.
    ///
    /// Dates and the stacking method are excluded: they do not change a
    /// correlation once computed.
    pub fn fingerprint(&self) -> String {
        let fields = FingerprintFields {
            samp_freq: self.samp_freq,
            cc_len: self.cc_len,
            step: self.step,
            freqmin: self.freqmin,
            freqmax: self.freqmax,
            freq_norm: self.freq_norm,
            maxlag: self.maxlag,
            ncomp: self.ncomp,
        };
        // Plain struct of numbers and a unit enum: bincode cannot fail here
        let bytes = bincode::serialize(&fields).unwrap_or_default();
        format!("{:08x}", crc32fast::hash(&bytes))
    }

    /// Check the numeric invariants later stages rely on
    pub fn validate(&self) -> Result<()> {
        if !(self.samp_freq > 0.0) {
            return Err(StoreError::Configuration(format!(
                "samp_freq must be positive, got {}",
                self.samp_freq
            )));
        }
        if !(self.freqmin > 0.0 && self.freqmin < self.freqmax) {
            return Err(StoreError::Configuration(format!(
                "frequency band {}..{} is invalid",
                self.freqmin, self.freqmax
            )));
        }
        if self.freqmax > self.samp_freq / 2.0 {
            warn!(
                freqmax = self.freqmax,
                nyquist = self.samp_freq / 2.0,
                "Upper frequency above Nyquist"
            );
        }
        if self.inc_hours == 0 || self.ncomp == 0 {
            return Err(StoreError::Configuration(
                "inc_hours and ncomp must be positive".to_string(),
            ));
        }
        self.date_range().map(|_| ())
    }
}

// =============================================================================
// Encode / Decode
// =============================================================================

#[derive(Serialize)]
struct MetadataDocumentRef<'a> {
    format_version: u32,
    #[serde(flatten)]
    params: &'a ConfigParameters,
}

#[derive(Deserialize)]
struct MetadataDocument {
    format_version: u32,
    #[serde(flatten)]
    params: ConfigParameters,
}

/// Current structured form
pub fn encode_metadata(params: &ConfigParameters) -> Result<String> {
    serde_json::to_string_pretty(&MetadataDocumentRef {
        format_version: METADATA_FORMAT_VERSION,
        params,
    })
    .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Decode the structured form; a newer `format_version` is a configuration error
pub fn decode_metadata(text: &str) -> Result<ConfigParameters> {
    let doc: MetadataDocument = serde_json::from_str(text)
        .map_err(|e| StoreError::Configuration(format!("invalid archive metadata: {}", e)))?;
    if doc.format_version == 0 || doc.format_version > METADATA_FORMAT_VERSION {
        return Err(StoreError::Configuration(format!(
            "archive metadata format version {} is not supported (max {})",
            doc.format_version, METADATA_FORMAT_VERSION
        )));
    }
    Ok(doc.params)
}

/// `{dir}/{stem}.json`
pub fn metadata_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.json", stem))
}

/// `{dir}/{stem}.txt`
pub fn legacy_metadata_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.txt", stem))
}

/// Read the record `stem` from `dir`, preferring the structured form
pub fn read_metadata(dir: &Path, stem: &str) -> Result<Option<ConfigParameters>> {
    let current = metadata_path(dir, stem);
    if current.is_file() {
        debug!(path = %current.display(), "Reading archive metadata");
        return decode_metadata(&fs::read_to_string(&current)?).map(Some);
    }
    let legacy = legacy_metadata_path(dir, stem);
    if legacy.is_file() {
        debug!(path = %legacy.display(), "Reading legacy archive metadata");
        return decode_legacy_metadata(&fs::read_to_string(&legacy)?).map(Some);
    }
    Ok(None)
}

/// Write the structured record atomically (unique staging file, fsync, rename)
///
/// An existing record with equal parameters is left in place, so workers
/// opening the same archive do not rewrite it.
pub fn write_metadata(dir: &Path, stem: &str, params: &ConfigParameters) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = metadata_path(dir, stem);
    let existing = fs::read_to_string(&path)
        .ok()
        .and_then(|text| decode_metadata(&text).ok());
    if existing.as_ref() == Some(params) {
        debug!(path = %path.display(), "Archive metadata unchanged");
        return Ok(path);
    }

    let staging = dir.join(format!(
        "{}.json.{}.{}.tmp",
        stem,
        std::process::id(),
        STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let result = write_synced(&staging, encode_metadata(params)?.as_bytes())
        .and_then(|_| fs::rename(&staging, &path));
    if let Err(e) = result {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    Ok(path)
}

/// Distinguishes staging files of concurrent writers within one process
static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_dates_and_stacking() {
        let a = ConfigParameters::default();
        let mut b = a.clone();
        b.stack_method = StackMethod::Pws;
        b.start_date = Some(Utc::now());
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.freq_norm = FreqNorm::PhaseOnly;
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 8);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("PHASE_ONLY".parse::<FreqNorm>().unwrap(), FreqNorm::PhaseOnly);
        assert_eq!(
            "auto_covariance".parse::<StackMethod>().unwrap(),
            StackMethod::AutoCovariance
        );
        assert!("median".parse::<StackMethod>().is_err());
    }

    #[test]
    fn test_write_metadata_leaves_no_staging_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut params = ConfigParameters::default();
        write_metadata(temp_dir.path(), FFT_CC_INFO, &params).unwrap();
        write_metadata(temp_dir.path(), FFT_CC_INFO, &params).unwrap();
        params.freqmax = 1.5;
        write_metadata(temp_dir.path(), FFT_CC_INFO, &params).unwrap();

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["fft_cc_data.json".to_string()]);
        assert_eq!(
            read_metadata(temp_dir.path(), FFT_CC_INFO).unwrap(),
            Some(params)
        );
    }

    #[test]
    fn test_validate_rejects_bad_band() {
        let mut params = ConfigParameters::default();
        params.freqmin = 3.0;
        assert!(params.validate().is_err());
    }
}
