//! Date/time value parsing.
//!
//! A partial date expands to a closed UTC range covering every instant the
//! text could denote: `2013` covers the whole year, `2013-01-14T10:00` the
//! whole minute. A value with explicit seconds denotes a single instant,
//! so start == end.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

lazy_static! {
    static ref DATE_TIME: Regex = Regex::new(
        r"^(?P<y>\d{4})(?:-(?P<mo>\d{2})(?:-(?P<d>\d{2})(?:T(?P<h>\d{2}):(?P<mi>\d{2})(?::(?P<s>\d{2})(?:\.(?P<f>\d{1,9}))?)?(?P<tz>[Zz]|[+-]\d{2}:\d{2})?)?)?)?$"
    )
    .unwrap();
}

/// Nanosecond offset of the last representable tick in a second (.9999999).
const LAST_TICK_NANOS: u32 = 999_999_900;

/// A UTC date/time range with start <= end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parse a FHIR date search value (`YYYY`, `YYYY-MM`, `YYYY-MM-DD`,
/// `YYYY-MM-DDThh:mm[:ss[.fff]][Z|±hh:mm]`) into a UTC range.
pub fn parse_date_range(raw: &str) -> Result<DateRange> {
    let caps = DATE_TIME
        .captures(raw)
        .ok_or_else(|| Error::InvalidValue(format!("invalid date search value: {}", raw)))?;

    let invalid = || Error::InvalidValue(format!("invalid date search value: {}", raw));

    let year: i32 = caps["y"].parse().map_err(|_| invalid())?;
    let month = match caps.name("mo") {
        Some(m) => Some(m.as_str().parse::<u32>().map_err(|_| invalid())?),
        None => None,
    };
    let day = match caps.name("d") {
        Some(d) => Some(d.as_str().parse::<u32>().map_err(|_| invalid())?),
        None => None,
    };

    let (start_date, end_date) = match (month, day) {
        (None, _) => (date(year, 1, 1, raw)?, date(year, 12, 31, raw)?),
        (Some(m), None) => (date(year, m, 1, raw)?, date(year, m, last_day(year, m), raw)?),
        (Some(m), Some(d)) => {
            let date = date(year, m, d, raw)?;
            (date, date)
        }
    };

    let offset = parse_offset(caps.name("tz").map(|m| m.as_str()), raw)?;

    let (start_time, end_time) = match caps.name("h") {
        None => (
            NaiveTime::MIN,
            time(23, 59, 59, LAST_TICK_NANOS, raw)?,
        ),
        Some(h) => {
            let hour: u32 = h.as_str().parse().map_err(|_| invalid())?;
            let minute: u32 = caps["mi"].parse().map_err(|_| invalid())?;
            match caps.name("s") {
                None => (
                    time(hour, minute, 0, 0, raw)?,
                    time(hour, minute, 59, LAST_TICK_NANOS, raw)?,
                ),
                Some(s) => {
                    let second: u32 = s.as_str().parse().map_err(|_| invalid())?;
                    let nanos = caps
                        .name("f")
                        .map(|f| fraction_nanos(f.as_str()))
                        .unwrap_or(0);
                    let instant = time(hour, minute, second, nanos, raw)?;
                    (instant, instant)
                }
            }
        }
    };

    Ok(DateRange {
        start: to_utc(start_date.and_time(start_time), offset, raw)?,
        end: to_utc(end_date.and_time(end_time), offset, raw)?,
    })
}

/// Widen a range for the `ap` comparator: each side grows by `percent` of
/// the range's width, with a floor of one day.
pub fn widen_date_range(range: &DateRange, percent: u32) -> DateRange {
    let span = range.end - range.start;
    let mut offset = span * percent as i32 / 100;
    if offset < Duration::days(1) {
        offset = Duration::days(1);
    }
    DateRange {
        start: range.start - offset,
        end: range.end + offset,
    }
}

fn date(year: i32, month: u32, day: u32, raw: &str) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| Error::InvalidValue(format!("invalid date search value: {}", raw)))
}

fn time(hour: u32, minute: u32, second: u32, nanos: u32, raw: &str) -> Result<NaiveTime> {
    NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
        .ok_or_else(|| Error::InvalidValue(format!("invalid time in date search value: {}", raw)))
}

fn last_day(year: i32, month: u32) -> u32 {
    for day in [31, 30, 29, 28] {
        if NaiveDate::from_ymd_opt(year, month, day).is_some() {
            return day;
        }
    }
    28
}

/// Digits after the decimal point, scaled to nanoseconds.
fn fraction_nanos(fraction: &str) -> u32 {
    let mut nanos = 0u32;
    for (i, c) in fraction.chars().take(9).enumerate() {
        nanos += (c as u32 - '0' as u32) * 10u32.pow(8 - i as u32);
    }
    nanos
}

fn parse_offset(tz: Option<&str>, raw: &str) -> Result<FixedOffset> {
    let utc = || FixedOffset::east_opt(0);
    let Some(tz) = tz else {
        return utc().ok_or_else(|| Error::InvalidValue(raw.to_string()));
    };
    if tz.eq_ignore_ascii_case("z") {
        return utc().ok_or_else(|| Error::InvalidValue(raw.to_string()));
    }
    let invalid = || Error::InvalidValue(format!("invalid timezone offset in: {}", raw));
    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let hours: i32 = tz[1..3].parse().map_err(|_| invalid())?;
    let minutes: i32 = tz[4..6].parse().map_err(|_| invalid())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn to_utc(naive: NaiveDateTime, offset: FixedOffset, raw: &str) -> Result<DateTime<Utc>> {
    naive
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidValue(format!("invalid date search value: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(
        y: i32,
        mo: u32,
        d: u32,
        h: u32,
        mi: u32,
        s: u32,
        nanos: u32,
    ) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap() + Duration::nanoseconds(nanos as i64)
    }

    #[test]
    fn year_covers_whole_year() {
        let range = parse_date_range("2013").unwrap();
        assert_eq!(range.start, utc(2013, 1, 1, 0, 0, 0, 0));
        assert_eq!(range.end, utc(2013, 12, 31, 23, 59, 59, LAST_TICK_NANOS));
    }

    #[test]
    fn month_covers_last_day_of_month() {
        let range = parse_date_range("2013-02").unwrap();
        assert_eq!(range.end, utc(2013, 2, 28, 23, 59, 59, LAST_TICK_NANOS));
        let leap = parse_date_range("2016-02").unwrap();
        assert_eq!(leap.end, utc(2016, 2, 29, 23, 59, 59, LAST_TICK_NANOS));
    }

    #[test]
    fn day_covers_whole_day() {
        let range = parse_date_range("2013-01-14").unwrap();
        assert_eq!(range.start, utc(2013, 1, 14, 0, 0, 0, 0));
        assert_eq!(range.end, utc(2013, 1, 14, 23, 59, 59, LAST_TICK_NANOS));
    }

    #[test]
    fn minute_precision_covers_whole_minute() {
        let range = parse_date_range("2013-01-14T10:00").unwrap();
        assert_eq!(range.start, utc(2013, 1, 14, 10, 0, 0, 0));
        assert_eq!(range.end, utc(2013, 1, 14, 10, 0, 59, LAST_TICK_NANOS));
    }

    #[test]
    fn seconds_yield_single_instant() {
        let range = parse_date_range("2013-01-14T10:00:05").unwrap();
        assert_eq!(range.start, range.end);
        assert_eq!(range.start, utc(2013, 1, 14, 10, 0, 5, 0));
    }

    #[test]
    fn fraction_is_scaled_to_nanoseconds() {
        let range = parse_date_range("2013-01-14T10:00:05.5").unwrap();
        assert_eq!(range.start, utc(2013, 1, 14, 10, 0, 5, 500_000_000));
    }

    #[test]
    fn offset_converts_to_utc() {
        let range = parse_date_range("2013-01-14T10:00:00+05:30").unwrap();
        assert_eq!(range.start, utc(2013, 1, 14, 4, 30, 0, 0));
        let z = parse_date_range("2013-01-14T10:00:00Z").unwrap();
        assert_eq!(z.start, utc(2013, 1, 14, 10, 0, 0, 0));
    }

    #[test]
    fn rejects_malformed_dates() {
        for raw in ["201", "2013-13", "2013-02-30", "2013-01-14T25:00", "notadate"] {
            assert!(parse_date_range(raw).is_err(), "{} should fail", raw);
        }
    }

    #[test]
    fn approx_widening_has_one_day_floor() {
        let day = parse_date_range("2013-01-14").unwrap();
        let widened = widen_date_range(&day, 10);
        assert_eq!(widened.start, day.start - Duration::days(1));
        assert_eq!(widened.end, day.end + Duration::days(1));
    }

    #[test]
    fn approx_widening_scales_with_range_width() {
        let year = parse_date_range("2013").unwrap();
        let widened = widen_date_range(&year, 10);
        let offset = (year.end - year.start) * 10 / 100;
        assert_eq!(widened.start, year.start - offset);
        assert_eq!(widened.end, year.end + offset);
    }
}
