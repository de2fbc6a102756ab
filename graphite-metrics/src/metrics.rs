use chrono::{Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::{CSV_TIMESTAMP_FORMAT, DataPoint, UnixTimestamp};

/// Separator between the fields of a Carbon plaintext line.
const PLAIN_TEXT_FIELD_SEPARATOR: char = ' ';

/// Separator between the fields of a render CSV row.
const CSV_FIELD_SEPARATOR: char = ',';

/// An error returned when a single plaintext line or CSV row cannot be parsed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseMetricError {
    /// The line does not consist of exactly three fields.
    #[error("Invalid request : {0}")]
    InvalidLine(String),
    /// The value field is not a floating point number.
    #[error("invalid value {value:?} in {line:?}")]
    InvalidValue {
        /// The complete line.
        line: String,
        /// The rejected value field.
        value: String,
    },
    /// The timestamp field is not a valid timestamp.
    #[error("invalid timestamp {timestamp:?} in {line:?}")]
    InvalidTimestamp {
        /// The complete line.
        line: String,
        /// The rejected timestamp field.
        timestamp: String,
    },
    /// The line is not valid UTF-8.
    #[error("line is not valid utf-8")]
    InvalidUtf8,
}

/// A named series and its data points.
///
/// Data points keep the order in which they were added. Use [`Metrics::sort_data_points`] before
/// relying on chronological order.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Metrics {
    name: String,
    data_points: Vec<DataPoint>,
}

impl Metrics {
    /// Creates an empty series.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_points: Vec::new(),
        }
    }

    /// Creates a series with the given data points.
    pub fn with_data_points(name: impl Into<String>, data_points: Vec<DataPoint>) -> Self {
        Self {
            name: name.into(),
            data_points,
        }
    }

    /// Returns the dot delimited name of the series.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the series.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Returns all data points in their current order.
    pub fn data_points(&self) -> &[DataPoint] {
        &self.data_points
    }

    /// Consumes the series and returns its data points.
    pub fn into_data_points(self) -> Vec<DataPoint> {
        self.data_points
    }

    /// Appends a data point. Duplicate timestamps are kept.
    pub fn add_data_point(&mut self, data_point: DataPoint) {
        self.data_points.push(data_point);
    }

    /// Appends the data points of `other`, which is expected to carry the same name.
    pub fn merge(&mut self, other: Metrics) {
        debug_assert_eq!(self.name, other.name);
        self.data_points.extend(other.data_points);
    }

    /// Returns the number of data points.
    pub fn data_point_count(&self) -> usize {
        self.data_points.len()
    }

    /// Returns `true` if the series has no data points.
    pub fn is_empty(&self) -> bool {
        self.data_points.is_empty()
    }

    /// Returns the data point at `index`, or `None` if it is out of range.
    pub fn data_point(&self, index: usize) -> Option<&DataPoint> {
        self.data_points.get(index)
    }

    /// Sorts the data points ascending by timestamp.
    ///
    /// The sort is stable: data points with equal timestamps keep the order in which they were
    /// added.
    pub fn sort_data_points(&mut self) {
        self.data_points.sort_by(DataPoint::cmp_by_timestamp);
    }

    /// Removes all data points for which `f` returns `false`.
    pub fn retain_data_points(&mut self, f: impl FnMut(&DataPoint) -> bool) {
        self.data_points.retain(f);
    }

    /// Returns the Carbon plaintext line `<name> <value> <unix-seconds>` for the data point at
    /// `index`.
    pub fn plain_text_line(&self, index: usize) -> Option<String> {
        let data_point = self.data_point(index)?;
        Some(format!("{} {}", self.name, data_point.plain_text_string()))
    }

    /// Parses a Carbon plaintext line of the form `<name> <value> <unix-seconds>`.
    ///
    /// Leading and trailing line breaks are ignored. The fields must be separated by exactly one
    /// space.
    pub fn parse_plain_text_line(line: &str) -> Result<Self, ParseMetricError> {
        let trimmed = line.trim_matches(['\n', '\r']);
        let [name, value, timestamp] = split_fields(trimmed, PLAIN_TEXT_FIELD_SEPARATOR)
            .ok_or_else(|| ParseMetricError::InvalidLine(line.to_owned()))?;

        let value = parse_value(line, value)?;
        let timestamp =
            timestamp
                .parse::<UnixTimestamp>()
                .map_err(|_| ParseMetricError::InvalidTimestamp {
                    line: line.to_owned(),
                    timestamp: timestamp.to_owned(),
                })?;

        let mut metrics = Self::new(name);
        metrics.add_data_point(DataPoint::new(value, timestamp));
        Ok(metrics)
    }

    /// Parses a render CSV row of the form `<name>,<YYYYMMDD HH:MM:SS>,<value>`.
    ///
    /// Whitespace around the fields is ignored, and the timestamp is interpreted in local time.
    pub fn parse_csv_line(line: &str) -> Result<Self, ParseMetricError> {
        let [name, timestamp, value] = split_fields(line, CSV_FIELD_SEPARATOR)
            .ok_or_else(|| ParseMetricError::InvalidLine(line.to_owned()))?;

        let timestamp = timestamp.trim();
        let parsed = NaiveDateTime::parse_from_str(timestamp, CSV_TIMESTAMP_FORMAT)
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            .and_then(|date_time| UnixTimestamp::from_datetime(&date_time))
            .ok_or_else(|| ParseMetricError::InvalidTimestamp {
                line: line.to_owned(),
                timestamp: timestamp.to_owned(),
            })?;

        let value = parse_value(line, value.trim())?;

        let mut metrics = Self::new(name.trim());
        metrics.add_data_point(DataPoint::new(value, parsed));
        Ok(metrics)
    }
}

/// Splits `line` into exactly three fields.
fn split_fields(line: &str, separator: char) -> Option<[&str; 3]> {
    let mut fields = line.split(separator);
    let result = [fields.next()?, fields.next()?, fields.next()?];
    match fields.next() {
        Some(_) => None,
        None => Some(result),
    }
}

fn parse_value(line: &str, value: &str) -> Result<f64, ParseMetricError> {
    value.parse().map_err(|_| ParseMetricError::InvalidValue {
        line: line.to_owned(),
        value: value.to_owned(),
    })
}
