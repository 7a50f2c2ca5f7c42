//! Error types for noisestore
//!
//! Every failure path in the store layer maps to one distinct variant so a
//! pipeline stage can decide per kind whether to skip, retry or abort.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for store, catalog and selector operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Configuration Errors (fatal)
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid time range: start {start} is not before end {end}")]
    InvalidRange { start: String, end: String },

    // -------------------------------------------------------------------------
    // Catalog Errors
    // -------------------------------------------------------------------------
    #[error("No metadata for channel {channel} at {at}")]
    UnknownChannel { channel: String, at: String },

    #[error("Ambiguous metadata for channel {channel} at {at}: {epochs} epochs overlap")]
    AmbiguousChannelMetadata {
        channel: String,
        at: String,
        epochs: usize,
    },

    // -------------------------------------------------------------------------
    // Data Errors
    // -------------------------------------------------------------------------
    #[error("Data not found: {0}")]
    DataNotFound(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Write Errors
    // -------------------------------------------------------------------------
    #[error("Conflicting write for {0}: different data already stored")]
    DuplicateWrite(String),

    #[error("Concurrent write detected: {0}")]
    ConcurrentWrite(String),

    #[error("Store is read-only: {0}")]
    ReadOnly(String),

    // -------------------------------------------------------------------------
    // Remote Fetch Errors
    // -------------------------------------------------------------------------
    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),
}

/// What a pipeline stage should do with a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop the whole run with an explanatory message
    Abort,
    /// Log, exclude this timespan/channel, continue
    Skip,
    /// Retry later with backoff; the store never retries itself
    Retry,
    /// Stop this worker's write path and alert (partitioning bug)
    HaltWrites,
}

impl StoreError {
    /// Classify the error for the calling stage
    pub fn disposition(&self) -> Disposition {
        match self {
            StoreError::Configuration(_)
            | StoreError::InvalidRange { .. }
            | StoreError::ReadOnly(_) => Disposition::Abort,
            StoreError::UnknownChannel { .. }
            | StoreError::AmbiguousChannelMetadata { .. }
            | StoreError::DataNotFound(_)
            | StoreError::CorruptData(_)
            | StoreError::Serialization(_) => Disposition::Skip,
            StoreError::TransientFetch(_) => Disposition::Retry,
            StoreError::DuplicateWrite(_) | StoreError::ConcurrentWrite(_) => {
                Disposition::HaltWrites
            }
            StoreError::Io(_) => Disposition::Abort,
        }
    }

    /// True when the caller may retry the same call later
    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispositions() {
        assert_eq!(
            StoreError::Configuration("x".into()).disposition(),
            Disposition::Abort
        );
        assert_eq!(
            StoreError::CorruptData("x".into()).disposition(),
            Disposition::Skip
        );
        assert_eq!(
            StoreError::DuplicateWrite("x".into()).disposition(),
            Disposition::HaltWrites
        );
        assert!(StoreError::TransientFetch("x".into()).is_retryable());
        assert!(!StoreError::DataNotFound("x".into()).is_retryable());
    }
}
