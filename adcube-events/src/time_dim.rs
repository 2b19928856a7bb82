//! Derived time dimensions as pure functions of `ts`.
//!
//! Timestamps are Unix milliseconds interpreted as UTC. Each dimension has a
//! dense integer code (what the builder hashes) and a canonical rendering
//! (what cube files and query literals use):
//!
//! - `day`: days since the Unix epoch; rendered `YYYY-MM-DD`.
//! - `hour`: hour of day 0-23; rendered as an integer.
//! - `minute`: minutes since the Unix epoch; rendered `YYYY-MM-DD HH:MM`.
//! - `week`: ISO year * 100 + ISO week; rendered `YYYY-WNN`.
//!
//! All date-like renderings share the `YYYY-MM-DD` prefix, so deriving `day`
//! from a `minute` string is a plain prefix projection.

use adcube_result::{Error, Result};
use time::{Date, Month};

pub const MS_PER_MINUTE: i64 = 60_000;
pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 = 86_400_000;
pub const MINUTES_PER_DAY: i64 = 1_440;

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Days since the Unix epoch for a millisecond timestamp.
#[inline]
pub fn day_code(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(MS_PER_DAY)
}

/// Hour of day (0-23) for a millisecond timestamp.
#[inline]
pub fn hour_of_day(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(MS_PER_HOUR).rem_euclid(24)
}

/// Minutes since the Unix epoch for a millisecond timestamp.
#[inline]
pub fn minute_code(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(MS_PER_MINUTE)
}

fn date_for_day_code(day: i64) -> Result<Date> {
    let julian = day
        .checked_add(i64::from(UNIX_EPOCH_JULIAN_DAY))
        .filter(|j| *j >= i64::from(i32::MIN) && *j <= i64::from(i32::MAX))
        .ok_or_else(|| Error::InputFormat(format!("timestamp day {day} out of range")))?;
    Date::from_julian_day(julian as i32)
        .map_err(|err| Error::InputFormat(format!("timestamp day {day} out of range: {err}")))
}

/// ISO week code (`iso_year * 100 + iso_week`) for a day code.
pub fn week_code(day: i64) -> Result<i64> {
    let date = date_for_day_code(day)?;
    let (iso_year, iso_week, _) = date.to_iso_week_date();
    Ok(i64::from(iso_year) * 100 + i64::from(iso_week))
}

/// Render a day code as its canonical `YYYY-MM-DD` form.
pub fn format_day(day: i64) -> Result<String> {
    let date = date_for_day_code(day)?;
    Ok(format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    ))
}

/// Render a minute code as its canonical `YYYY-MM-DD HH:MM` form.
pub fn format_minute(minute: i64) -> Result<String> {
    let day = minute.div_euclid(MINUTES_PER_DAY);
    let of_day = minute.rem_euclid(MINUTES_PER_DAY);
    Ok(format!(
        "{} {:02}:{:02}",
        format_day(day)?,
        of_day / 60,
        of_day % 60
    ))
}

/// Render a week code as its canonical `YYYY-WNN` form.
pub fn format_week(week: i64) -> String {
    format!("{:04}-W{:02}", week.div_euclid(100), week.rem_euclid(100))
}

/// Parse a calendar date into its day code. Accepts unpadded month and day
/// components so `2024-6-1` and `2024-06-01` agree.
pub fn parse_day(text: &str) -> Result<i64> {
    let mut parts = text.split('-');
    let (year, month, day) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(y), Some(m), Some(d), None) => (y, m, d),
        _ => {
            return Err(Error::QueryMalformed(format!(
                "invalid date literal '{text}'"
            )));
        }
    };
    let year: i32 = year
        .parse()
        .map_err(|_| Error::QueryMalformed(format!("invalid year in date literal '{text}'")))?;
    let month: u8 = month
        .parse()
        .map_err(|_| Error::QueryMalformed(format!("invalid month in date literal '{text}'")))?;
    let day: u8 = day
        .parse()
        .map_err(|_| Error::QueryMalformed(format!("invalid day in date literal '{text}'")))?;
    let month = Month::try_from(month)
        .map_err(|err| Error::QueryMalformed(format!("invalid date literal '{text}': {err}")))?;
    let date = Date::from_calendar_date(year, month, day)
        .map_err(|err| Error::QueryMalformed(format!("invalid date literal '{text}': {err}")))?;
    Ok(i64::from(date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY))
}

/// Normalize a calendar-date literal to the canonical `YYYY-MM-DD` form used
/// by the `day` dimension.
pub fn normalize_day_literal(text: &str) -> Result<String> {
    format_day(parse_day(text)?)
}

/// `day` prefix of a canonical minute string.
pub fn day_prefix_of_minute(minute: &str) -> &str {
    &minute[..minute.len().min(10)]
}

/// Hour of day encoded in a canonical minute string.
pub fn hour_of_minute_str(minute: &str) -> Result<i64> {
    minute
        .get(11..13)
        .and_then(|h| h.parse().ok())
        .ok_or_else(|| Error::Internal(format!("malformed minute string '{minute}'")))
}

/// ISO week string for a canonical day string.
pub fn week_of_day_str(day: &str) -> Result<String> {
    Ok(format_week(week_code(parse_day(day)?)?))
}
