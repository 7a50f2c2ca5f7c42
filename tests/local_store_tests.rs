//! Tests for the local container store
//!
//! These tests verify:
//! - The one-hour, one-channel archive scenario
//! - Append/read round trip, idempotence and conflict detection
//! - Enumeration preconditions (unknown timespans)
//! - Persistence across instances and concurrent-write detection on open
//! - Sample-count validation

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use noisestore::catalog::InstrumentResponse;
use noisestore::container::{
    container_path, lock_path, temp_path, write_container, ContainerKind, WriteLock,
};
use noisestore::store::ContainerRawDataStore;
use noisestore::{
    AppendOutcome, Channel, ChannelData, ChannelType, RawDataStore, Station, StoreError, Timespan,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn hour(h: u32) -> Timespan {
    Timespan::new(
        Utc.with_ymd_and_hms(2019, 2, 1, h, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2019, 2, 1, h + 1, 0, 0).unwrap(),
    )
    .unwrap()
}

fn channel(station: &str, code: &str) -> Channel {
    Channel::new(
        Station {
            network: "CI".to_string(),
            name: station.to_string(),
            location: "00".to_string(),
            latitude: 35.3443,
            longitude: -119.1043,
            elevation: 116.0,
        },
        ChannelType::new(code, "00"),
    )
}

/// One hour at 20 Hz, inclusive of the end sample
fn hour_of_data(ts: &Timespan, seed: f32) -> ChannelData {
    let samples = (0..72001).map(|i| seed + (i as f32 * 0.01).sin()).collect();
    ChannelData::new(samples, 20.0, ts.start_timestamp())
}

fn append(store: &ContainerRawDataStore, ts: &Timespan, ch: &Channel, data: &ChannelData) -> AppendOutcome {
    store
        .writer()
        .expect("container store is writable")
        .append_data(ts, ch, data)
        .unwrap()
}

// =============================================================================
// Scenario Tests
// =============================================================================

#[test]
fn test_single_hour_single_channel_archive() {
    let (_temp, root) = setup_temp_store();
    let ts = hour(0);
    {
        let store = ContainerRawDataStore::open(&root).unwrap();
        append(&store, &ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));
    }

    let store = ContainerRawDataStore::open(&root).unwrap();
    let timespans = store.get_timespans().unwrap();
    assert_eq!(timespans.len(), 1);
    assert_eq!(timespans[0].start(), Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap());
    assert_eq!(timespans[0].end(), Utc.with_ymd_and_hms(2019, 2, 1, 1, 0, 0).unwrap());

    let channels = store.get_channels(&timespans[0]).unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].station.name, "BAK");
    assert_eq!(channels[0].channel_type.to_string(), "bhn_00");

    let data = store.read_data(&timespans[0], &channels[0]).unwrap();
    assert_eq!(data.len(), 72001);
    assert_eq!(data.sampling_rate, 20.0);
    assert_eq!(data.start_timestamp, timespans[0].start_timestamp());
}

#[test]
fn test_roundtrip_preserves_samples() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    let ch = channel("BAK", "BHZ");
    let input = hour_of_data(&ts, 1.5);

    assert_eq!(append(&store, &ts, &ch, &input), AppendOutcome::Written);

    let output = store.read_data(&ts, &ch).unwrap();
    assert_eq!(output, input);
}

#[test]
fn test_timespans_are_chronological() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    for h in [5, 1, 3] {
        let ts = hour(h);
        append(&store, &ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));
    }

    assert_eq!(store.get_timespans().unwrap(), vec![hour(1), hour(3), hour(5)]);
    // Stable across calls
    assert_eq!(store.get_timespans().unwrap(), store.get_timespans().unwrap());
}

// =============================================================================
// Idempotence / Conflict Tests
// =============================================================================

#[test]
fn test_identical_append_is_noop() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    let ch = channel("BAK", "BHN");
    let data = hour_of_data(&ts, 0.0);

    assert_eq!(append(&store, &ts, &ch, &data), AppendOutcome::Written);
    let before = fs::read(container_path(&root, &ts)).unwrap();

    assert_eq!(append(&store, &ts, &ch, &data), AppendOutcome::Unchanged);
    let after = fs::read(container_path(&root, &ts)).unwrap();

    assert_eq!(before, after);
    assert_eq!(store.get_channels(&ts).unwrap().len(), 1);
}

#[test]
fn test_conflicting_append_fails() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    let ch = channel("BAK", "BHN");
    let original = hour_of_data(&ts, 0.0);
    append(&store, &ts, &ch, &original);
    let before = fs::read(container_path(&root, &ts)).unwrap();

    let result = store
        .writer()
        .unwrap()
        .append_data(&ts, &ch, &hour_of_data(&ts, 9.0));
    assert!(matches!(result, Err(StoreError::DuplicateWrite(_))));

    // Archive untouched, lock released
    assert_eq!(fs::read(container_path(&root, &ts)).unwrap(), before);
    assert!(!lock_path(&container_path(&root, &ts)).exists());
    assert_eq!(store.read_data(&ts, &ch).unwrap(), original);
}

#[test]
fn test_reappend_with_richer_metadata_is_noop() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    let plain = channel("BAK", "BHN");
    let data = hour_of_data(&ts, 0.0);
    append(&store, &ts, &plain, &data);

    // Catalog entry gained a response since the first write
    let mut richer = plain.clone();
    richer.response = Some(InstrumentResponse {
        sensitivity: 6.27e8,
        frequency: 1.0,
        input_units: "m/s".to_string(),
        output_units: "counts".to_string(),
    });
    assert_eq!(append(&store, &ts, &richer, &data), AppendOutcome::Unchanged);
    assert_eq!(store.get_channels(&ts).unwrap(), vec![plain]);

    let result = store
        .writer()
        .unwrap()
        .append_data(&ts, &richer, &hour_of_data(&ts, 3.0));
    assert!(matches!(result, Err(StoreError::DuplicateWrite(_))));
}

#[test]
fn test_second_channel_same_timespan() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    append(&store, &ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));
    append(&store, &ts, &channel("BAK", "BHE"), &hour_of_data(&ts, 1.0));

    let channels = store.get_channels(&ts).unwrap();
    let types: Vec<String> = channels.iter().map(|c| c.channel_type.to_string()).collect();
    assert_eq!(types, vec!["bhe_00", "bhn_00"]);
}

#[test]
fn test_sub_second_timespans_use_separate_containers() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let t0 = Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap();
    let whole = Timespan::new(t0, t0 + Duration::seconds(1)).unwrap();
    let shifted = Timespan::new(
        t0 + Duration::milliseconds(500),
        t0 + Duration::milliseconds(1500),
    )
    .unwrap();
    let ch = channel("BAK", "BHN");
    let first = ChannelData::new(vec![1.0; 21], 20.0, whole.start_timestamp());
    let second = ChannelData::new(vec![2.0; 21], 20.0, shifted.start_timestamp());

    assert_eq!(append(&store, &whole, &ch, &first), AppendOutcome::Written);
    assert_eq!(append(&store, &shifted, &ch, &second), AppendOutcome::Written);
    assert_ne!(container_path(&root, &whole), container_path(&root, &shifted));

    let reopened = ContainerRawDataStore::open(&root).unwrap();
    assert_eq!(reopened.get_timespans().unwrap(), vec![whole, shifted]);
    assert_eq!(reopened.read_data(&whole, &ch).unwrap(), first);
    assert_eq!(reopened.read_data(&shifted, &ch).unwrap(), second);
}

// =============================================================================
// Precondition / Error Tests
// =============================================================================

#[test]
fn test_get_channels_unknown_timespan() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    append(&store, &ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));

    // Overlapping is not equal
    let wider = Timespan::new(ts.start(), hour(1).end()).unwrap();
    assert!(matches!(
        store.get_channels(&wider),
        Err(StoreError::DataNotFound(_))
    ));
}

#[test]
fn test_empty_container_is_not_listed() {
    let (_temp, root) = setup_temp_store();
    let ts = hour(2);
    let path = container_path(&root, &ts);
    {
        let _lock = WriteLock::acquire(&path).unwrap();
        write_container(&path, ContainerKind::Waveform, &ts, &BTreeMap::new()).unwrap();
    }

    let store = ContainerRawDataStore::open(&root).unwrap();
    assert_eq!(store.container_count(), 1);
    assert!(store.get_timespans().unwrap().is_empty());
    assert!(matches!(
        store.get_channels(&ts),
        Err(StoreError::DataNotFound(_))
    ));
}

#[test]
fn test_read_unindexed_channel() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    append(&store, &ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));

    assert!(matches!(
        store.read_data(&ts, &channel("CMB", "BHN")),
        Err(StoreError::DataNotFound(_))
    ));
    assert!(matches!(
        store.read_data(&hour(4), &channel("BAK", "BHN")),
        Err(StoreError::DataNotFound(_))
    ));
}

#[test]
fn test_append_rejects_too_many_samples() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    let data = ChannelData::new(vec![0.0; 72002], 20.0, ts.start_timestamp());

    let result = store
        .writer()
        .unwrap()
        .append_data(&ts, &channel("BAK", "BHN"), &data);
    assert!(matches!(result, Err(StoreError::CorruptData(_))));
    assert!(!container_path(&root, &ts).exists());
}

#[test]
fn test_append_accepts_gaps() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    let data = ChannelData::new(vec![0.5; 36000], 20.0, ts.start_timestamp());

    append(&store, &ts, &channel("BAK", "BHN"), &data);
    assert_eq!(store.read_data(&ts, &channel("BAK", "BHN")).unwrap().len(), 36000);
}

// =============================================================================
// Persistence / Concurrency Tests
// =============================================================================

#[test]
fn test_new_instance_sees_committed_data() {
    let (_temp, root) = setup_temp_store();
    let writer = ContainerRawDataStore::open(&root).unwrap();
    let reader = ContainerRawDataStore::open(&root).unwrap();

    let ts = hour(0);
    append(&writer, &ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));

    // The earlier instance keeps its index; a new one observes the write
    assert!(reader.get_timespans().unwrap().is_empty());
    let fresh = ContainerRawDataStore::open(&root)
        .unwrap()
        .with_span(tracing::info_span!("reader"));
    assert_eq!(fresh.get_timespans().unwrap(), vec![ts]);
    fresh.verify_integrity().unwrap();
}

#[test]
fn test_open_fails_on_leftover_lock() {
    let (_temp, root) = setup_temp_store();
    let ts = hour(0);
    {
        let store = ContainerRawDataStore::open(&root).unwrap();
        append(&store, &ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));
    }
    fs::write(lock_path(&container_path(&root, &ts)), b"4242\n").unwrap();

    assert!(matches!(
        ContainerRawDataStore::open(&root),
        Err(StoreError::ConcurrentWrite(_))
    ));
}

#[test]
fn test_open_fails_on_abandoned_staging_file() {
    let (_temp, root) = setup_temp_store();
    fs::write(temp_path(&container_path(&root, &hour(2))), b"partial").unwrap();

    assert!(matches!(
        ContainerRawDataStore::open(&root),
        Err(StoreError::ConcurrentWrite(_))
    ));
}

#[test]
fn test_append_fails_while_locked() {
    let (_temp, root) = setup_temp_store();
    let store = ContainerRawDataStore::open(&root).unwrap();
    let ts = hour(0);
    fs::write(lock_path(&container_path(&root, &ts)), b"4242\n").unwrap();

    let result = store
        .writer()
        .unwrap()
        .append_data(&ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));
    assert!(matches!(result, Err(StoreError::ConcurrentWrite(_))));
    assert!(!container_path(&root, &ts).exists());
}

#[test]
fn test_corrupt_waveform_payload_is_reported() {
    let (_temp, root) = setup_temp_store();
    let ts = hour(0);
    let path = container_path(&root, &ts);
    {
        let store = ContainerRawDataStore::open(&root).unwrap();
        append(&store, &ts, &channel("BAK", "BHN"), &hour_of_data(&ts, 0.0));
    }

    // Damage the last sample bytes, inside the waveform entry
    let mut bytes = fs::read(&path).unwrap();
    let len = bytes.len();
    let index_offset = u64::from_le_bytes(bytes[len - 16..len - 8].try_into().unwrap()) as usize;
    bytes[index_offset - 1] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let store = ContainerRawDataStore::open(&root).unwrap();
    let channels = store.get_channels(&ts).unwrap();
    assert!(matches!(
        store.read_data(&ts, &channels[0]),
        Err(StoreError::CorruptData(_))
    ));
    assert!(store.verify_integrity().is_err());
}
