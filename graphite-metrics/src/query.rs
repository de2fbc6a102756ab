use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::UnixTimestamp;
use crate::expression::{self, ParseTimeError};

/// Path of the render endpoint.
pub const RENDER_PATH: &str = "/render";

/// Default time span of a query when `from` is not given.
const DEFAULT_QUERY_SPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// Query parameter names.
mod params {
    pub const QUERY: &str = "query";
    pub const TARGET: &str = "target";
    pub const FROM: &str = "from";
    pub const UNTIL: &str = "until";
    pub const FORMAT: &str = "format";
}

/// The output format requested by a render or find request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum QueryFormat {
    /// One line per series: `name,from,until,step|v1,...,vn`.
    Raw,
    /// One line per data point: `name,YYYYMMDD HH:MM:SS,value`.
    Csv,
    /// A JSON array of `{"target", "datapoints"}` objects.
    Json,
    /// The JSON tree format of the find endpoint.
    TreeJson,
    /// The completer format of the find endpoint.
    Completer,
}

impl QueryFormat {
    /// Returns the value of the `format` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::TreeJson => "treejson",
            Self::Completer => "completer",
        }
    }

    /// Returns the `Content-Type` of responses in this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Raw => "text/plain",
            Self::Csv => "text/csv",
            Self::Json | Self::TreeJson | Self::Completer => "application/json",
        }
    }
}

impl fmt::Display for QueryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned for unknown values of the `format` parameter.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown format {0:?}")]
pub struct UnknownFormatError(pub String);

impl FromStr for QueryFormat {
    type Err = UnknownFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "raw" => Self::Raw,
            "csv" => Self::Csv,
            "json" => Self::Json,
            "treejson" => Self::TreeJson,
            "completer" => Self::Completer,
            other => return Err(UnknownFormatError(other.to_owned())),
        })
    }
}

/// An error returned when the parameters of a request cannot be turned into a [`Query`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseQueryError {
    /// A `from` or `until` value is not a time expression.
    #[error("invalid {param} parameter")]
    InvalidTime {
        /// The name of the parameter.
        param: &'static str,
        /// The underlying time error.
        #[source]
        source: ParseTimeError,
    },
    /// The `format` value is unknown.
    #[error(transparent)]
    UnknownFormat(#[from] UnknownFormatError),
    /// A URL cannot be built without a target.
    #[error("target is not specified")]
    MissingTarget,
}

/// Describes a find or render request.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// The target pattern, a dot delimited path that may contain wildcards.
    pub target: String,
    /// Start of the requested range.
    pub from: Option<UnixTimestamp>,
    /// End of the requested range.
    pub until: Option<UnixTimestamp>,
    /// The requested output format, if any.
    pub format: Option<QueryFormat>,
}

impl Query {
    /// Creates a query for the last 24 hours without target.
    pub fn new() -> Self {
        let now = UnixTimestamp::now();
        Self {
            target: String::new(),
            from: Some(now.saturating_sub(DEFAULT_QUERY_SPAN)),
            until: Some(now),
            format: None,
        }
    }

    /// Creates a query for the last 24 hours with the given target.
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::new()
        }
    }

    /// Parses the URL query string of a `/render` request.
    pub fn from_render_params(query_string: &str) -> Result<Self, ParseQueryError> {
        let mut query = Self::new();
        for (key, value) in first_values(query_string) {
            query.apply_param(&key, &value)?;
        }
        Ok(query)
    }

    /// Parses the URL query string of a `/metrics/find` request.
    ///
    /// The pattern is taken from `query`, which takes precedence over `target`.
    pub fn from_find_params(query_string: &str) -> Result<Self, ParseQueryError> {
        let mut query = Self::new();
        let mut pattern = None;

        for (key, value) in first_values(query_string) {
            match key.as_ref() {
                params::QUERY => pattern = Some(value.into_owned()),
                _ => query.apply_param(&key, &value)?,
            }
        }

        if let Some(pattern) = pattern {
            query.target = pattern;
        }

        Ok(query)
    }

    /// Applies a single request parameter. Unknown parameters are ignored.
    pub fn apply_param(&mut self, key: &str, value: &str) -> Result<(), ParseQueryError> {
        match key {
            params::TARGET => self.target = value.to_owned(),
            params::FROM => self.from = Some(parse_time(params::FROM, value)?),
            params::UNTIL => self.until = Some(parse_time(params::UNTIL, value)?),
            params::FORMAT => self.format = Some(value.parse()?),
            _ => (),
        }

        Ok(())
    }

    /// Returns `true` if `timestamp` lies within `from` and `until`, both inclusive.
    pub fn contains(&self, timestamp: UnixTimestamp) -> bool {
        self.from.is_none_or(|from| from <= timestamp)
            && self.until.is_none_or(|until| timestamp <= until)
    }

    /// Builds the URL of a render request for this query.
    ///
    /// Times are encoded as absolute `HH:MM_YYYYMMDD` expressions, and the format defaults to CSV.
    pub fn to_url(&self, host: &str, port: u16) -> Result<String, ParseQueryError> {
        if self.target.is_empty() {
            return Err(ParseQueryError::MissingTarget);
        }

        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.append_pair(params::TARGET, &self.target);
        if let Some(from) = self.from {
            serializer.append_pair(params::FROM, &expression::format_absolute(from));
        }
        if let Some(until) = self.until {
            serializer.append_pair(params::UNTIL, &expression::format_absolute(until));
        }
        let format = self.format.unwrap_or(QueryFormat::Csv);
        serializer.append_pair(params::FORMAT, format.as_str());

        Ok(format!(
            "http://{host}:{port}{RENDER_PATH}?{}",
            serializer.finish()
        ))
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes a query string, keeping only the first value of every parameter.
fn first_values(query_string: &str) -> BTreeMap<Cow<'_, str>, Cow<'_, str>> {
    let mut values = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query_string.as_bytes()) {
        values.entry(key).or_insert(value);
    }
    values
}

/// Evaluates a time parameter, preferring the relative forms.
fn parse_time(param: &'static str, value: &str) -> Result<UnixTimestamp, ParseQueryError> {
    let result = if expression::is_relative(value) {
        expression::relative_to_time(value)
    } else if expression::is_absolute(value) {
        expression::absolute_to_time(value)
    } else {
        Err(ParseTimeError::InvalidTimeFormat(value.to_owned()))
    };

    result.map_err(|source| ParseQueryError::InvalidTime { param, source })
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let query = Query::new();
        let (from, until) = (query.from.unwrap(), query.until.unwrap());
        assert_eq!(until - from, DEFAULT_QUERY_SPAN);
        assert!(query.target.is_empty());
        assert_eq!(query.format, None);
    }

    #[test]
    fn test_render_params() {
        let query =
            Query::from_render_params("target=foo.*&from=1500000000&until=1500003600&format=raw")
                .unwrap();
        assert_eq!(
            query,
            Query {
                target: "foo.*".to_owned(),
                from: Some(UnixTimestamp::from_secs(1_500_000_000)),
                until: Some(UnixTimestamp::from_secs(1_500_003_600)),
                format: Some(QueryFormat::Raw),
            }
        );
    }

    #[test]
    fn test_relative_params() {
        let query = Query::from_render_params("target=x&from=-2h&until=now").unwrap();
        let (from, until) = (query.from.unwrap(), query.until.unwrap());
        let span = (until - from).as_secs();
        assert!((7_199..=7_201).contains(&span), "{span}");
    }

    #[test]
    fn test_first_value_wins() {
        let query = Query::from_render_params("target=a&target=b&format=csv").unwrap();
        assert_eq!(query.target, "a");
        assert_eq!(query.format, Some(QueryFormat::Csv));
    }

    #[test]
    fn test_invalid_time() {
        let error = Query::from_render_params("target=a&from=yesterday").unwrap_err();
        assert_eq!(
            error,
            ParseQueryError::InvalidTime {
                param: "from",
                source: ParseTimeError::InvalidTimeFormat("yesterday".to_owned()),
            }
        );
    }

    #[test]
    fn test_unknown_format() {
        let error = Query::from_render_params("target=a&format=png").unwrap_err();
        assert_eq!(error.to_string(), "unknown format \"png\"");
    }

    #[test]
    fn test_find_params() {
        let query = Query::from_find_params("query=servers.*&target=ignored&format=treejson")
            .unwrap();
        assert_eq!(query.target, "servers.*");
        assert_eq!(query.format, Some(QueryFormat::TreeJson));

        let query = Query::from_find_params("target=servers.web").unwrap();
        assert_eq!(query.target, "servers.web");
    }

    #[test]
    fn test_to_url() {
        let mut query = Query::with_target("servers.*.cpu");
        query.from = None;
        query.until = None;
        assert_eq!(
            query.to_url("localhost", 8080).unwrap(),
            "http://localhost:8080/render?target=servers.*.cpu&format=csv"
        );

        let from = expression::absolute_to_time("04:00_20170101").unwrap();
        query.from = Some(from);
        query.format = Some(QueryFormat::Json);
        assert_eq!(
            query.to_url("localhost", 8080).unwrap(),
            "http://localhost:8080/render?target=servers.*.cpu&from=04%3A00_20170101&format=json"
        );
    }

    #[test]
    fn test_to_url_roundtrip() {
        let mut query = Query::with_target("a.b");
        query.from = Some(expression::absolute_to_time("04:00_20170101").unwrap());
        query.until = Some(expression::absolute_to_time("05:30_20170101").unwrap());
        query.format = Some(QueryFormat::Raw);

        let url = query.to_url("example.com", 8080).unwrap();
        let (_, query_string) = url.split_once('?').unwrap();
        assert_eq!(Query::from_render_params(query_string).unwrap(), query);
    }

    #[test]
    fn test_to_url_requires_target() {
        assert_eq!(
            Query::new().to_url("localhost", 8080),
            Err(ParseQueryError::MissingTarget)
        );
    }

    #[test]
    fn test_contains() {
        let mut query = Query::new();
        query.from = Some(UnixTimestamp::from_secs(10));
        query.until = Some(UnixTimestamp::from_secs(20));
        assert!(query.contains(UnixTimestamp::from_secs(10)));
        assert!(query.contains(UnixTimestamp::from_secs(20)));
        assert!(!query.contains(UnixTimestamp::from_secs(21)));

        query.until = None;
        assert!(query.contains(UnixTimestamp::from_secs(1_000)));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(QueryFormat::Raw.content_type(), "text/plain");
        assert_eq!(QueryFormat::Csv.content_type(), "text/csv");
        assert_eq!(QueryFormat::Json.content_type(), "application/json");
    }
}
