use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[inline]
pub fn dt_to_ns(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt()
        .unwrap_or(if dt.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

#[inline]
pub fn ns_to_dt(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d %b %Y %H:%M:%S%.f",
    "%d %b %Y %H:%M",
    "%d/%m/%Y %H:%M:%S%.f",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %b %Y", "%Y%m%d"];

/// Parses the timestamp spellings found in tick exports into UTC nanoseconds.
///
/// Plain integers are taken as nanoseconds since the epoch. Naive datetimes are UTC.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    if s.len() != 8 {
        if let Ok(ns) = s.parse::<i64>() {
            return Some(ns);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt_to_ns(dt.with_timezone(&Utc)));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt_to_ns(dt.with_timezone(&Utc)));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt_to_ns(Utc.from_utc_datetime(&naive)));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return Some(dt_to_ns(Utc.from_utc_datetime(&naive)));
        }
    }
    None
}

/// Inclusive `[start, finish]` interval in UTC nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct TimeRange {
    start_ns: i64,
    finish_ns: i64,
}

#[derive(Deserialize)]
struct RawRange {
    start_ns: i64,
    finish_ns: i64,
}

impl TryFrom<RawRange> for TimeRange {
    type Error = StoreError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        TimeRange::from_ns(raw.start_ns, raw.finish_ns)
    }
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, finish: DateTime<Utc>) -> Result<Self, StoreError> {
        Self::from_ns(dt_to_ns(start), dt_to_ns(finish))
    }

    pub fn from_ns(start_ns: i64, finish_ns: i64) -> Result<Self, StoreError> {
        if start_ns > finish_ns {
            return Err(StoreError::InvalidRequest(format!(
                "range start {} is after finish {}",
                ns_to_dt(start_ns),
                ns_to_dt(finish_ns)
            )));
        }
        Ok(Self {
            start_ns,
            finish_ns,
        })
    }

    /// Both ends accept any spelling understood by [`parse_timestamp`], e.g. `"26 Apr 2017 00:00"`.
    pub fn parse(start: &str, finish: &str) -> Result<Self, StoreError> {
        let s = parse_timestamp(start)
            .ok_or_else(|| StoreError::InvalidRequest(format!("unparseable start '{start}'")))?;
        let f = parse_timestamp(finish)
            .ok_or_else(|| StoreError::InvalidRequest(format!("unparseable finish '{finish}'")))?;
        Self::from_ns(s, f)
    }

    pub const fn everything() -> Self {
        Self {
            start_ns: i64::MIN,
            finish_ns: i64::MAX,
        }
    }

    pub const fn start_ns(&self) -> i64 {
        self.start_ns
    }

    pub const fn finish_ns(&self) -> i64 {
        self.finish_ns
    }

    pub fn start(&self) -> DateTime<Utc> {
        ns_to_dt(self.start_ns)
    }

    pub fn finish(&self) -> DateTime<Utc> {
        ns_to_dt(self.finish_ns)
    }

    #[inline]
    pub fn contains_ns(&self, ns: i64) -> bool {
        self.start_ns <= ns && ns <= self.finish_ns
    }

    /// Closed-interval intersection test; ranges sharing only an endpoint overlap.
    #[inline]
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_ns <= other.finish_ns && self.finish_ns >= other.start_ns
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start().to_rfc3339(),
            self.finish().to_rfc3339()
        )
    }
}
