//! # noisestore
//!
//! Data store and channel catalog layer for an ambient-noise seismic
//! pipeline:
//! - One time-indexed, channel-indexed interface over two archive layouts
//!   (local container files, network/station/day object layout)
//! - Channel metadata from a station table or StationXML inventories
//! - Idempotent, atomic appends with duplicate and concurrent-write detection
//! - Correlation archive keyed by timespan, station pair and parameters
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Pipeline stages                          │
//! │          (download / cross-correlate / stack)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Store Selector                             │
//! │        (container files? inventory? station table?)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐      ┌─────────────┐
//!   │  Container  │          │   Object    │◄─────│   Channel   │
//!   │ (RwLock idx)│          │ (day index) │      │   Catalog   │
//!   └──────┬──────┘          └──────┬──────┘      └─────────────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ .wfc files  │          │ FileSystem  │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod timespan;
pub mod catalog;
pub mod filter;
pub mod fs;
pub mod container;
pub mod store;
pub mod cc;
pub mod params;
pub mod selector;
pub mod pipeline;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use catalog::{Channel, ChannelCatalog, ChannelId, ChannelType, Station};
pub use cc::{CcStore, CrossCorrelation, StationPair, StoreMode};
pub use config::PipelineConfig;
pub use error::{Disposition, Result, StoreError};
pub use filter::ChannelFilter;
pub use params::ConfigParameters;
pub use selector::select_raw_store;
pub use store::{AppendOutcome, ChannelData, RawDataStore, RawDataWriter};
pub use timespan::Timespan;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of noisestore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
