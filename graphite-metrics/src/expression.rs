//! Absolute and relative time expressions as used by the render API.
//!
//! Absolute expressions denote a fixed instant:
//!
//!  - `now`
//!  - `HH:MM_YYYYMMDD` in the local timezone of this host, for example `04:00_20170101`
//!  - a bare integer of seconds since the UNIX epoch
//!
//! Relative expressions denote an offset into the past from the moment they are evaluated, written
//! as `-<N><unit>` with one of the units `s`, `min`, `h`, `d`, `w`, `mon` (30 days) and `y`
//! (365 days). There is no calendar aware arithmetic.
//!
//! The bare integer form also accepts the empty string, so callers that need to tell `-30` apart
//! from an integer should check [`is_relative`] first.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::UnixTimestamp;

/// The `strftime` format of absolute clock expressions.
pub const ABSOLUTE_TIME_FORMAT: &str = "%H:%M_%Y%m%d";

/// The literal that denotes the current time.
const NOW: &str = "now";

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// An error returned when a time expression cannot be evaluated.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseTimeError {
    /// The string does not match any known form, or denotes an instant that cannot be represented.
    #[error("invalid time format : {0}")]
    InvalidTimeFormat(String),
}

impl ParseTimeError {
    fn invalid(s: &str) -> Self {
        Self::InvalidTimeFormat(s.to_owned())
    }
}

#[derive(Clone, Copy, Debug)]
enum AbsoluteForm {
    Now,
    Clock,
    Seconds,
}

/// Absolute forms in priority order.
static ABSOLUTE_FORMS: Lazy<[(Regex, AbsoluteForm); 3]> = Lazy::new(|| {
    [
        (Regex::new(r"^now$").unwrap(), AbsoluteForm::Now),
        (
            Regex::new(r"^[0-9]{2}:[0-9]{2}_[0-9]{8}$").unwrap(),
            AbsoluteForm::Clock,
        ),
        (Regex::new(r"^[0-9]*$").unwrap(), AbsoluteForm::Seconds),
    ]
});

/// Relative forms with their unit length in seconds. The first match wins.
static RELATIVE_FORMS: Lazy<[(Regex, u64); 7]> = Lazy::new(|| {
    [
        (Regex::new(r"^-([0-9]+)s$").unwrap(), 1),
        (Regex::new(r"^-([0-9]+)min$").unwrap(), MINUTE),
        (Regex::new(r"^-([0-9]+)h$").unwrap(), HOUR),
        (Regex::new(r"^-([0-9]+)d$").unwrap(), DAY),
        (Regex::new(r"^-([0-9]+)w$").unwrap(), 7 * DAY),
        (Regex::new(r"^-([0-9]+)mon$").unwrap(), 30 * DAY),
        (Regex::new(r"^-([0-9]+)y$").unwrap(), 365 * DAY),
    ]
});

fn absolute_form(s: &str) -> Option<AbsoluteForm> {
    ABSOLUTE_FORMS
        .iter()
        .find(|(regex, _)| regex.is_match(s))
        .map(|(_, form)| *form)
}

/// Returns the offset a relative expression denotes, if `s` is one.
fn relative_offset(s: &str) -> Option<Result<Duration, ParseTimeError>> {
    RELATIVE_FORMS.iter().find_map(|(regex, unit)| {
        let captures = regex.captures(s)?;
        let offset = captures[1]
            .parse::<u64>()
            .ok()
            .and_then(|count| count.checked_mul(*unit))
            .map(Duration::from_secs)
            .ok_or_else(|| ParseTimeError::invalid(s));
        Some(offset)
    })
}

/// Returns `true` if `s` has the shape of an absolute time expression.
pub fn is_absolute(s: &str) -> bool {
    absolute_form(s).is_some()
}

/// Returns `true` if `s` has the shape of a relative time expression.
pub fn is_relative(s: &str) -> bool {
    RELATIVE_FORMS.iter().any(|(regex, _)| regex.is_match(s))
}

/// Converts an absolute time expression into a timestamp.
pub fn absolute_to_time(s: &str) -> Result<UnixTimestamp, ParseTimeError> {
    match absolute_form(s) {
        Some(AbsoluteForm::Now) => Ok(UnixTimestamp::now()),
        Some(AbsoluteForm::Clock) => {
            let naive = NaiveDateTime::parse_from_str(s, ABSOLUTE_TIME_FORMAT)
                .map_err(|_| ParseTimeError::invalid(s))?;
            Local
                .from_local_datetime(&naive)
                .earliest()
                .and_then(|date_time| UnixTimestamp::from_datetime(&date_time))
                .ok_or_else(|| ParseTimeError::invalid(s))
        }
        Some(AbsoluteForm::Seconds) => s.parse().map_err(|_| ParseTimeError::invalid(s)),
        None => Err(ParseTimeError::invalid(s)),
    }
}

/// Converts a relative time expression into a timestamp, relative to the current time.
pub fn relative_to_time(s: &str) -> Result<UnixTimestamp, ParseTimeError> {
    relative_to_time_at(s, UnixTimestamp::now())
}

/// Converts a relative time expression into a timestamp, relative to `now`.
///
/// Offsets reaching before the UNIX epoch saturate at the epoch.
pub fn relative_to_time_at(s: &str, now: UnixTimestamp) -> Result<UnixTimestamp, ParseTimeError> {
    match relative_offset(s) {
        Some(offset) => Ok(now.saturating_sub(offset?)),
        None => Err(ParseTimeError::invalid(s)),
    }
}

/// Evaluates an absolute or relative time expression, trying the absolute forms first.
pub fn parse(s: &str) -> Result<UnixTimestamp, ParseTimeError> {
    let absolute = match is_absolute(s) {
        true => Some(absolute_to_time(s)),
        false => None,
    };

    match absolute {
        Some(Ok(timestamp)) => Ok(timestamp),
        _ if is_relative(s) => relative_to_time(s),
        Some(Err(error)) => Err(error),
        None => Err(ParseTimeError::invalid(s)),
    }
}

/// Formats a timestamp as absolute `HH:MM_YYYYMMDD` clock expression in local time.
pub fn format_absolute(timestamp: UnixTimestamp) -> String {
    timestamp
        .as_local()
        .format(ABSOLUTE_TIME_FORMAT)
        .to_string()
}
