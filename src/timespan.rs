//! Timespan
//!
//! Half-open UTC interval `[start, end)`, the indexing unit for raw waveform
//! and cross-correlation containers.
//!
//! Equality is exact on both endpoints. Callers that want "nearest" or
//! "overlapping" semantics must call [`Timespan::overlaps`] explicitly.
//! Endpoints are held to the microsecond, the resolution of container headers.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};

use crate::error::{Result, StoreError};

/// Layout used in container file names and legacy metadata records.
/// `%.f` prints a fraction only for sub-second endpoints and parses it as optional.
const NAME_FORMAT: &str = "%Y_%m_%d_%H_%M_%S%.f";

/// Separator between the start and end halves of a timespan name
const NAME_SEPARATOR: char = 'T';

/// Immutable half-open time interval. Ordered by start, then end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timespan {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Timespan {
    /// Create a timespan, failing with `InvalidRange` unless `start < end`.
    /// Sub-microsecond parts of the endpoints are dropped.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let start = start.trunc_subsecs(6);
        let end = end.trunc_subsecs(6);
        if start >= end {
            return Err(StoreError::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Create from epoch seconds
    pub fn from_timestamps(start: f64, end: f64) -> Result<Self> {
        Self::new(datetime_from_timestamp(start)?, datetime_from_timestamp(end)?)
    }

    /// Create from epoch microseconds (container header encoding)
    pub fn from_micros(start: i64, end: i64) -> Result<Self> {
        let start = datetime_from_micros(start)?;
        let end = datetime_from_micros(end)?;
        Self::new(start, end)
    }

    /// The whole UTC day `[date 00:00, date+1 00:00)`
    pub fn day(date: NaiveDate) -> Self {
        let start = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::default()));
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Length in (fractional) seconds
    pub fn duration_seconds(&self) -> f64 {
        self.end_timestamp() - self.start_timestamp()
    }

    /// Start as epoch seconds
    pub fn start_timestamp(&self) -> f64 {
        to_timestamp(&self.start)
    }

    /// End as epoch seconds
    pub fn end_timestamp(&self) -> f64 {
        to_timestamp(&self.end)
    }

    pub fn start_micros(&self) -> i64 {
        self.start.timestamp_micros()
    }

    pub fn end_micros(&self) -> i64 {
        self.end.timestamp_micros()
    }

    /// `start <= at < end`
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start <= *at && *at < self.end
    }

    /// True when the two intervals share at least one instant
    pub fn overlaps(&self, other: &Timespan) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Overlapping part of two timespans, if any
    pub fn intersection(&self, other: &Timespan) -> Option<Timespan> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        Timespan::new(start, end).ok()
    }

    /// UTC days touched by this timespan, in order
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut day = self.start.date_naive();
        while Timespan::day(day).start < self.end {
            days.push(day);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        days
    }

    /// Consecutive chunks of at most `step`; the last one may be shorter
    pub fn split(&self, step: Duration) -> Result<Vec<Timespan>> {
        if step <= Duration::zero() {
            return Err(StoreError::Configuration(format!(
                "split step must be positive, got {}",
                step
            )));
        }
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = (cursor + step).min(self.end);
            chunks.push(Timespan::new(cursor, next)?);
            cursor = next;
        }
        Ok(chunks)
    }

    /// Name used for container files: `2019_02_01_00_00_00T2019_02_01_01_00_00`,
    /// or `2019_02_01_00_00_00.500T...` when an endpoint has a fraction
    pub fn name(&self) -> String {
        format!(
            "{}{}{}",
            self.start.format(NAME_FORMAT),
            NAME_SEPARATOR,
            self.end.format(NAME_FORMAT)
        )
    }

    /// Inverse of [`Timespan::name`]
    pub fn parse_name(name: &str) -> Result<Self> {
        let (start, end) = name.split_once(NAME_SEPARATOR).ok_or_else(|| {
            StoreError::Configuration(format!("'{}' is not a timespan name", name))
        })?;
        let parse = |s: &str| {
            NaiveDateTime::parse_from_str(s, NAME_FORMAT)
                .map(|dt| Utc.from_utc_datetime(&dt))
                .map_err(|e| {
                    StoreError::Configuration(format!("'{}' is not a timespan name: {}", name, e))
                })
        };
        Self::new(parse(start)?, parse(end)?)
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Timestamp Helpers
// =============================================================================

fn to_timestamp(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9
}

/// Epoch seconds → UTC datetime (nanosecond rounding)
pub fn datetime_from_timestamp(ts: f64) -> Result<DateTime<Utc>> {
    if !ts.is_finite() {
        return Err(StoreError::Configuration(format!("invalid timestamp {}", ts)));
    }
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9).round() as u32;
    let (secs, nanos) = if nanos >= 1_000_000_000 {
        (secs as i64 + 1, 0)
    } else {
        (secs as i64, nanos)
    };
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| StoreError::Configuration(format!("timestamp {} out of range", ts)))
}

/// Epoch microseconds → UTC datetime
pub fn datetime_from_micros(micros: i64) -> Result<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| StoreError::Configuration(format!("timestamp {}us out of range", micros)))
}

/// Parse a user-supplied date. Naive forms are taken as UTC.
///
/// Accepted: RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS[.f]`,
/// `YYYY-MM-DD HH:MM:SS`, and `YYYY_MM_DD_HH_MM_SS`.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", NAME_FORMAT] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Timespan::day(date).start());
    }
    Err(StoreError::Configuration(format!(
        "could not parse date '{}': expected RFC 3339, YYYY-MM-DD[THH:MM:SS] or YYYY_MM_DD_HH_MM_SS",
        s
    )))
}

/// Optional date-range restriction from a pair of user inputs.
///
/// Both missing (or either missing) means "no restriction". A reversed
/// range is a configuration error, not an `InvalidRange`.
pub fn date_range(start: Option<&str>, end: Option<&str>) -> Result<Option<Timespan>> {
    match (start, end) {
        (Some(start), Some(end)) => {
            let start = parse_datetime(start)?;
            let end = parse_datetime(end)?;
            Timespan::new(start, end).map(Some).map_err(|e| {
                StoreError::Configuration(format!("invalid date range: {}", e))
            })
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        let ts = Timespan::new(
            parse_datetime("2019-02-01T00:00:00Z").unwrap(),
            parse_datetime("2019-02-01T01:00:00Z").unwrap(),
        )
        .unwrap();
        assert_eq!(ts.name(), "2019_02_01_00_00_00T2019_02_01_01_00_00");
        assert_eq!(Timespan::parse_name(&ts.name()).unwrap(), ts);
    }

    #[test]
    fn test_timestamp_conversion() {
        let dt = datetime_from_timestamp(1548979200.25).unwrap();
        assert_eq!(dt.timestamp(), 1548979200);
        assert_eq!(dt.timestamp_subsec_millis(), 250);
        assert_eq!(datetime_from_micros(-1).unwrap().timestamp(), -1);
    }

    #[test]
    fn test_days_spanned() {
        let ts = Timespan::new(
            parse_datetime("2020-01-01T12:00:00Z").unwrap(),
            parse_datetime("2020-01-03T00:00:00Z").unwrap(),
        )
        .unwrap();
        let days = ts.days();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0], NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(days[1], NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
    }
}
