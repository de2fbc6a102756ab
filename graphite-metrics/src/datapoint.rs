use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::UnixTimestamp;

/// The `strftime` format of timestamps in CSV rows, interpreted in local time.
pub const CSV_TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S";

/// Formats a sample value with six fractional digits.
///
/// This matches the `%f` formatting of the reference Graphite tools, including the spelling of
/// infinities (`+Inf` and `-Inf`) and `NaN`.
#[derive(Clone, Copy, Debug)]
pub struct FormatValue(pub f64);

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            value if value.is_nan() => f.write_str("NaN"),
            value if value == f64::INFINITY => f.write_str("+Inf"),
            value if value == f64::NEG_INFINITY => f.write_str("-Inf"),
            value => write!(f, "{value:.6}"),
        }
    }
}

/// A single sample of a series: a value at a timestamp with second resolution.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct DataPoint {
    value: f64,
    timestamp: UnixTimestamp,
}

impl DataPoint {
    /// Creates a new data point.
    pub fn new(value: f64, timestamp: UnixTimestamp) -> Self {
        Self { value, timestamp }
    }

    /// Returns the sampled value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Replaces the sampled value.
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Returns the time of the sample.
    pub fn timestamp(&self) -> UnixTimestamp {
        self.timestamp
    }

    /// Replaces the time of the sample.
    pub fn set_timestamp(&mut self, timestamp: UnixTimestamp) {
        self.timestamp = timestamp;
    }

    /// Compares two data points by their timestamps only.
    pub fn cmp_by_timestamp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }

    /// Returns `<value> <unix-seconds>`, the tail of a Carbon plaintext line.
    pub fn plain_text_string(&self) -> String {
        format!("{} {}", FormatValue(self.value), self.timestamp)
    }

    /// Returns `<YYYYMMDD HH:MM:SS>,<value>`, the tail of a render CSV row.
    pub fn csv_string(&self) -> String {
        format!("{},{}", self.timestamp_string(), FormatValue(self.value))
    }

    /// Returns the timestamp formatted for CSV rows in local time.
    pub fn timestamp_string(&self) -> String {
        self.timestamp
            .as_local()
            .format(CSV_TIMESTAMP_FORMAT)
            .to_string()
    }
}
