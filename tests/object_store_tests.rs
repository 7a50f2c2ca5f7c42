//! Tests for the object-layout store
//!
//! These tests verify:
//! - Day timespans derived from the objects that exist
//! - Station filter and date-range restrictions
//! - Channel metadata resolved through the catalog
//! - Decode failures and fetch failures surfaced as distinct errors

use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use noisestore::catalog::CsvChannelCatalog;
use noisestore::fs::{FileSystem, LocalFileSystem};
use noisestore::store::{encode_trace, object_key, ObjectRawDataStore};
use noisestore::{ChannelData, ChannelFilter, ChannelId, RawDataStore, Result, StoreError, Timespan};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const STATION_TABLE: &str = "\
network,station,channel,location,latitude,longitude,elevation
CI,BAK,BHN,00,35.3443,-119.1043,116.0
CI,BAK,BHZ,00,35.3443,-119.1043,116.0
CI,CMB,BHZ,00,38.0346,-120.3865,697.0
";

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 2, day).unwrap()
}

/// One day at 1 Hz, inclusive of the end sample
fn day_of_data(day: u32) -> ChannelData {
    let ts = Timespan::day(date(day));
    let samples = (0..86401).map(|i| (i % 100) as f32).collect();
    ChannelData::new(samples, 1.0, ts.start_timestamp())
}

fn write_object(root: &Path, id: &ChannelId, day: u32, bytes: &[u8]) {
    let key = object_key(&LocalFileSystem, &root.to_string_lossy(), id, date(day));
    let path = Path::new(&key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Archive with BAK.BHN on Feb 1-2, BAK.BHZ on Feb 2, CMB.BHZ on Feb 3
fn setup_archive() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let bhn = ChannelId::new("CI", "BAK", "00", "BHN");
    let bhz = ChannelId::new("CI", "BAK", "00", "BHZ");
    let cmb = ChannelId::new("CI", "CMB", "00", "BHZ");
    write_object(root, &bhn, 1, &encode_trace(&day_of_data(1)));
    write_object(root, &bhn, 2, &encode_trace(&day_of_data(2)));
    write_object(root, &bhz, 2, &encode_trace(&day_of_data(2)));
    write_object(root, &cmb, 3, &encode_trace(&day_of_data(3)));
    temp_dir
}

fn open_store(
    root: &Path,
    fs: Arc<dyn FileSystem>,
    filter: ChannelFilter,
    date_range: Option<Timespan>,
) -> ObjectRawDataStore {
    let catalog = Arc::new(CsvChannelCatalog::from_reader(STATION_TABLE.as_bytes()).unwrap());
    ObjectRawDataStore::open(&root.to_string_lossy(), fs, catalog, filter, date_range).unwrap()
}

/// Lists like the local disk but every fetch times out
struct UnreachableFileSystem;

impl FileSystem for UnreachableFileSystem {
    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        LocalFileSystem.list_dir(dir)
    }

    fn exists(&self, path: &str) -> bool {
        LocalFileSystem.exists(path)
    }

    fn read(&self, path: &str) -> Result<Bytes> {
        Err(StoreError::TransientFetch(format!("{}: timed out", path)))
    }

    fn read_range(&self, path: &str, _range: Range<u64>) -> Result<Bytes> {
        self.read(path)
    }
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_object_key_layout() {
    let id = ChannelId::new("CI", "BAK", "00", "BHN");
    let key = object_key(&LocalFileSystem, "s3/continuous", &id, date(1));
    assert_eq!(key, "s3/continuous/CI/BAK/2019/032/BAK.CI.BHN.00.2019.032");
}

// =============================================================================
// Enumeration Tests
// =============================================================================

#[test]
fn test_timespans_are_days_with_objects() {
    let archive = setup_archive();
    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, None);

    assert_eq!(
        store.get_timespans().unwrap(),
        vec![Timespan::day(date(1)), Timespan::day(date(2)), Timespan::day(date(3))]
    );
    assert!(store.writer().is_none());
    assert_eq!(store.backend(), "object");
}

#[test]
fn test_channels_resolved_from_catalog() {
    let archive = setup_archive();
    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, None);

    let channels = store.get_channels(&Timespan::day(date(2))).unwrap();
    let names: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
    assert_eq!(names, vec!["BAK.bhn_00", "BAK.bhz_00"]);
    assert_eq!(channels[0].station.latitude, 35.3443);
}

#[test]
fn test_station_filter_restricts_timespans() {
    let archive = setup_archive();
    let store = open_store(
        archive.path(),
        Arc::new(LocalFileSystem),
        ChannelFilter::new(&["CMB"]),
        None,
    );

    assert_eq!(store.get_timespans().unwrap(), vec![Timespan::day(date(3))]);
    let channels = store.get_channels(&Timespan::day(date(3))).unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].station.name, "CMB");
}

#[test]
fn test_date_range_restricts_timespans() {
    let archive = setup_archive();
    let range = Timespan::new(
        Timespan::day(date(2)).start(),
        Timespan::day(date(3)).start(),
    )
    .unwrap();
    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, Some(range));

    assert_eq!(store.get_timespans().unwrap(), vec![Timespan::day(date(2))]);
}

#[test]
fn test_get_channels_unknown_timespan() {
    let archive = setup_archive();
    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, None);

    let result = store.get_channels(&Timespan::day(date(10)));
    assert!(matches!(result, Err(StoreError::DataNotFound(_))));
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_read_data() {
    let archive = setup_archive();
    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, None)
        .with_span(tracing::info_span!("object_reader"));
    let ts = Timespan::day(date(1));
    let channel = store.get_channels(&ts).unwrap().remove(0);

    let data = store.read_data(&ts, &channel).unwrap();
    assert_eq!(data, day_of_data(1));
    assert_eq!(data.start_timestamp, ts.start_timestamp());
}

#[test]
fn test_read_unindexed_pair() {
    let archive = setup_archive();
    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, None);
    let day2 = Timespan::day(date(2));
    let bak = store.get_channels(&day2).unwrap().remove(0);

    // BAK has no object on Feb 3
    let result = store.read_data(&Timespan::day(date(3)), &bak);
    assert!(matches!(result, Err(StoreError::DataNotFound(_))));
}

#[test]
fn test_corrupt_object() {
    let archive = setup_archive();
    let id = ChannelId::new("CI", "BAK", "00", "BHN");
    let mut bytes = encode_trace(&day_of_data(1));
    bytes[40] ^= 0xFF;
    write_object(archive.path(), &id, 1, &bytes);

    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, None);
    let ts = Timespan::day(date(1));
    let channel = store.get_channels(&ts).unwrap().remove(0);
    assert!(matches!(
        store.read_data(&ts, &channel),
        Err(StoreError::CorruptData(_))
    ));
}

#[test]
fn test_object_with_too_many_samples() {
    let archive = setup_archive();
    let id = ChannelId::new("CI", "BAK", "00", "BHN");
    let mut data = day_of_data(1);
    data.data.extend([0.0, 0.0]);
    write_object(archive.path(), &id, 1, &encode_trace(&data));

    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, None);
    let ts = Timespan::day(date(1));
    let channel = store.get_channels(&ts).unwrap().remove(0);
    assert!(matches!(
        store.read_data(&ts, &channel),
        Err(StoreError::CorruptData(_))
    ));
}

#[test]
fn test_object_removed_after_indexing() {
    let archive = setup_archive();
    let store = open_store(archive.path(), Arc::new(LocalFileSystem), ChannelFilter::All, None);
    let ts = Timespan::day(date(3));
    let channel = store.get_channels(&ts).unwrap().remove(0);

    let key = object_key(
        &LocalFileSystem,
        &archive.path().to_string_lossy(),
        &channel.id(),
        date(3),
    );
    fs::remove_file(key).unwrap();

    assert!(matches!(
        store.read_data(&ts, &channel),
        Err(StoreError::DataNotFound(_))
    ));
}

#[test]
fn test_fetch_failure_is_retryable() {
    let archive = setup_archive();
    let store = open_store(archive.path(), Arc::new(UnreachableFileSystem), ChannelFilter::All, None);
    let ts = Timespan::day(date(1));
    let channel = store.get_channels(&ts).unwrap().remove(0);

    let err = store.read_data(&ts, &channel).unwrap_err();
    assert!(matches!(err, StoreError::TransientFetch(_)));
    assert!(err.is_retryable());
}
