//! Wall-clock capture timestamps.
//!
//! Consumer cameras that tag their output with MDPM metadata record the
//! wall-clock time of each frame at whole-second resolution, in the camera's
//! local timezone. [`CaptureTimestamp`] is that value: a fixed-offset
//! datetime that round-trips through RFC 3339 text.

use std::{fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, SecondsFormat, TimeZone};

use crate::error::FrameStepError;

/// A whole-second wall-clock capture time with a fixed UTC offset.
///
/// Ordering compares the underlying instants, which is what the timestamp
/// reconciler needs when walking anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaptureTimestamp(DateTime<FixedOffset>);

impl CaptureTimestamp {
    /// Wrap an existing chrono datetime.
    pub fn new(datetime: DateTime<FixedOffset>) -> Self {
        Self(datetime)
    }

    /// Build a timestamp from broken-down local fields and a UTC offset in
    /// seconds.
    ///
    /// Returns `None` when the fields do not form a valid date/time or the
    /// offset is out of range, which is how malformed embedded metadata is
    /// rejected.
    pub fn from_fields(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        offset_seconds: i32,
    ) -> Option<Self> {
        let offset = FixedOffset::east_opt(offset_seconds)?;
        offset
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .map(Self)
    }

    /// The underlying chrono datetime.
    pub fn datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }

    /// UTC offset in seconds.
    pub fn offset_seconds(&self) -> i32 {
        self.0.offset().local_minus_utc()
    }

    /// Whole seconds from `earlier` to `self` (negative when `self` is the
    /// earlier instant).
    pub fn seconds_since(&self, earlier: &CaptureTimestamp) -> i64 {
        self.0.signed_duration_since(earlier.0).num_seconds()
    }

    /// This timestamp shifted forward by a number of whole seconds.
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + chrono::Duration::seconds(seconds))
    }
}

impl fmt::Display for CaptureTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl FromStr for CaptureTimestamp {
    type Err = FrameStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s)
            .map(Self)
            .map_err(|_| FrameStepError::TimestampParse(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trip() {
        let ts = CaptureTimestamp::from_fields(2021, 3, 14, 9, 26, 53, 3600).unwrap();
        let text = ts.to_string();
        assert_eq!(text, "2021-03-14T09:26:53+01:00");
        assert_eq!(text.parse::<CaptureTimestamp>().unwrap(), ts);
    }

    #[test]
    fn utc_renders_with_z() {
        let ts = CaptureTimestamp::from_fields(2021, 3, 14, 9, 26, 53, 0).unwrap();
        assert_eq!(ts.to_string(), "2021-03-14T09:26:53Z");
    }

    #[test]
    fn invalid_fields_rejected() {
        assert!(CaptureTimestamp::from_fields(2021, 13, 1, 0, 0, 0, 0).is_none());
        assert!(CaptureTimestamp::from_fields(2021, 2, 30, 0, 0, 0, 0).is_none());
    }

    #[test]
    fn second_arithmetic() {
        let a = CaptureTimestamp::from_fields(2021, 3, 14, 9, 26, 53, 0).unwrap();
        let b = a.plus_seconds(67);
        assert_eq!(b.seconds_since(&a), 67);
        assert_eq!(b.to_string(), "2021-03-14T09:28:00Z");
    }
}
