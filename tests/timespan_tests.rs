//! Tests for Timespan
//!
//! These tests verify:
//! - Construction rejects empty and reversed intervals
//! - Half-open containment and overlap
//! - Ordering by start then end, exact equality
//! - Day iteration, splitting and naming
//! - Date-range parsing from user input

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use noisestore::timespan::{date_range, parse_datetime};
use noisestore::{StoreError, Timespan};

// =============================================================================
// Helper Functions
// =============================================================================

fn ts(start_hour: u32, end_hour: u32) -> Timespan {
    Timespan::new(
        Utc.with_ymd_and_hms(2019, 2, 1, start_hour, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2019, 2, 1, end_hour, 0, 0).unwrap(),
    )
    .unwrap()
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_new_rejects_empty_range() {
    let t = Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap();
    let result = Timespan::new(t, t);
    assert!(matches!(result, Err(StoreError::InvalidRange { .. })));
}

#[test]
fn test_new_rejects_reversed_range() {
    let start = Utc.with_ymd_and_hms(2019, 2, 1, 1, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap();
    assert!(matches!(
        Timespan::new(start, end),
        Err(StoreError::InvalidRange { .. })
    ));
}

#[test]
fn test_from_timestamps() {
    let span = ts(0, 1);
    let again = Timespan::from_timestamps(span.start_timestamp(), span.end_timestamp()).unwrap();
    assert_eq!(span, again);
    assert_eq!(span.duration_seconds(), 3600.0);
    assert_eq!(span.start_timestamp(), 1548979200.0);
}

// =============================================================================
// Containment / Overlap Tests
// =============================================================================

#[test]
fn test_contains_is_half_open() {
    let span = ts(0, 1);
    assert!(span.contains(&span.start()));
    assert!(!span.contains(&span.end()));
    assert!(span.contains(&(span.start() + Duration::minutes(30))));
}

#[test]
fn test_overlaps() {
    assert!(ts(0, 2).overlaps(&ts(1, 3)));
    assert!(!ts(0, 1).overlaps(&ts(1, 2)));
    assert_eq!(ts(0, 2).intersection(&ts(1, 3)), Some(ts(1, 2)));
    assert_eq!(ts(0, 1).intersection(&ts(1, 2)), None);
}

#[test]
fn test_ordering_and_equality() {
    let mut spans = vec![ts(2, 3), ts(0, 2), ts(0, 1)];
    spans.sort();
    assert_eq!(spans, vec![ts(0, 1), ts(0, 2), ts(2, 3)]);

    // Overlapping but different endpoints are never equal
    assert_ne!(ts(0, 1), ts(0, 2));
}

// =============================================================================
// Day / Split / Name Tests
// =============================================================================

#[test]
fn test_days_and_split() {
    let date = NaiveDate::from_ymd_opt(2019, 2, 1).unwrap();
    let day = Timespan::day(date);
    assert_eq!(day.duration(), Duration::days(1));
    assert_eq!(day.days(), vec![date]);

    let hours = day.split(Duration::hours(1)).unwrap();
    assert_eq!(hours.len(), 24);
    assert_eq!(hours[0], ts(0, 1));
    assert!(day.split(Duration::zero()).is_err());
}

#[test]
fn test_name_roundtrip() {
    let span = ts(0, 1);
    assert_eq!(span.name(), "2019_02_01_00_00_00T2019_02_01_01_00_00");
    assert_eq!(Timespan::parse_name(&span.name()).unwrap(), span);
    assert!(Timespan::parse_name("2019_02_01").is_err());
}

#[test]
fn test_sub_second_names_are_distinct() {
    let t0 = Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap();
    let whole = Timespan::new(t0, t0 + Duration::seconds(1)).unwrap();
    let shifted = Timespan::new(
        t0 + Duration::milliseconds(500),
        t0 + Duration::milliseconds(1500),
    )
    .unwrap();

    assert_eq!(
        shifted.name(),
        "2019_02_01_00_00_00.500T2019_02_01_00_00_01.500"
    );
    assert_ne!(whole.name(), shifted.name());
    assert_eq!(Timespan::parse_name(&shifted.name()).unwrap(), shifted);
}

#[test]
fn test_endpoints_kept_to_the_microsecond() {
    let t0 = Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap();
    let fine = Timespan::new(
        t0 + Duration::nanoseconds(1_500),
        t0 + Duration::nanoseconds(2_000_700),
    )
    .unwrap();
    assert_eq!(fine.start(), t0 + Duration::microseconds(1));
    assert_eq!(fine.end(), t0 + Duration::microseconds(2_000));
    assert_eq!(fine.name(), "2019_02_01_00_00_00.000001T2019_02_01_00_00_00.002");
    assert_eq!(Timespan::parse_name(&fine.name()).unwrap(), fine);

    // Collapses to an empty interval once truncated
    assert!(matches!(
        Timespan::new(t0, t0 + Duration::nanoseconds(999)),
        Err(StoreError::InvalidRange { .. })
    ));
}

// =============================================================================
// Date Parsing Tests
// =============================================================================

#[test]
fn test_parse_datetime_forms() {
    let expected = Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap();
    assert_eq!(parse_datetime("2019-02-01").unwrap(), expected);
    assert_eq!(parse_datetime("2019-02-01T00:00:00Z").unwrap(), expected);
    assert_eq!(parse_datetime("2019-02-01T00:00:00").unwrap(), expected);
    assert_eq!(parse_datetime("2019_02_01_00_00_00").unwrap(), expected);
    assert!(parse_datetime("yesterday").is_err());
}

#[test]
fn test_date_range() {
    assert_eq!(date_range(None, Some("2019-02-02")).unwrap(), None);

    let range = date_range(Some("2019-02-01"), Some("2019-02-02")).unwrap().unwrap();
    assert_eq!(range.duration(), Duration::days(1));

    let reversed = date_range(Some("2019-02-02"), Some("2019-02-01"));
    assert!(matches!(reversed, Err(StoreError::Configuration(_))));
}
